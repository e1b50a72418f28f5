//! Wire envelope construction
//!
//! Pure, allocation-only functions that assemble the two outer envelope
//! shapes and the inner messages nested inside them. Nothing here performs
//! I/O; transport and routing live in sibling modules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain_types::{Direction, HopCount, InstanceUuid, ResponseUuid, RoutingPath, ZoneName};

/// An inner, application-level message: a method name plus its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the method to invoke once the message reaches its
    /// destination.
    pub method: String,
    /// Arguments for that method, shaped however the method expects.
    pub args: Value,
}

impl Message {
    /// Builds an inner message from any serializable argument payload.
    ///
    /// # Errors
    /// Returns an error if `args` cannot be encoded as JSON.
    pub fn new<T: Serialize>(method: impl Into<String>, args: &T) -> serde_json::Result<Self> {
        Ok(Self {
            method: method.into(),
            args: serde_json::to_value(args)?,
        })
    }
}

/// Arguments of a routed request, the outer `route_message` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedArgs {
    /// Final destination zone name.
    pub dest_zone_name: ZoneName,
    /// Direction this hop travels.
    pub direction: Direction,
    /// The inner message to execute once it arrives.
    pub message: Message,
    /// Chain of zones that have already handled this message.
    pub routing_path: Option<RoutingPath>,
    /// Whether the originator is waiting for a response.
    #[serde(default)]
    pub need_response: bool,
    /// Correlation id for the originator's in-flight rendezvous slot.
    pub response_uuid: Option<ResponseUuid>,
}

/// Arguments of a broadcast request, the outer `broadcast_message` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastArgs {
    /// Direction this hop travels.
    pub direction: Direction,
    /// The inner message, executed at every zone it reaches.
    pub message: Message,
    /// Chain of zones that have already handled this message.
    pub routing_path: Option<RoutingPath>,
    /// Number of hops already traveled.
    pub hopcount: HopCount,
    /// Whether delivery to neighbours should use the transport's fanout
    /// primitive.
    pub fanout: bool,
}

/// The outer envelope: the only two shapes ever placed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum Envelope {
    /// A point-to-point routed request.
    #[serde(rename = "route_message")]
    RouteMessage(RoutedArgs),
    /// A fan-out broadcast request.
    #[serde(rename = "broadcast_message")]
    BroadcastMessage(BroadcastArgs),
}

/// Builds a routed request envelope.
#[must_use]
pub fn routing_envelope(
    dest_zone_name: ZoneName,
    direction: Direction,
    message: Message,
    routing_path: Option<RoutingPath>,
    need_response: bool,
    response_uuid: Option<ResponseUuid>,
) -> Envelope {
    Envelope::RouteMessage(RoutedArgs {
        dest_zone_name,
        direction,
        message,
        routing_path,
        need_response,
        response_uuid,
    })
}

/// Builds a broadcast request envelope.
#[must_use]
pub fn broadcast_envelope(
    direction: Direction,
    message: Message,
    routing_path: Option<RoutingPath>,
    hopcount: HopCount,
    fanout: bool,
) -> Envelope {
    Envelope::BroadcastMessage(BroadcastArgs {
        direction,
        message,
        routing_path,
        hopcount,
        fanout,
    })
}

/// Result carried back in a `send_response` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    /// Whether the remote execution raised an error.
    pub failure: bool,
    /// On success, the method's return value. On failure, a
    /// `(kind, message, trace)` triple encoded as a JSON array.
    pub result: Value,
}

impl ResultInfo {
    /// Wraps a successful result.
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self {
            failure: false,
            result,
        }
    }

    /// Wraps a remote failure, preserving the error kind, message and a
    /// best-effort trace string.
    #[must_use]
    pub fn failure(kind: &str, message: &str, trace: &str) -> Self {
        Self {
            failure: true,
            result: Value::Array(vec![
                Value::String(kind.to_string()),
                Value::String(message.to_string()),
                Value::String(trace.to_string()),
            ]),
        }
    }
}

/// Builds the inner `send_response` message carried by a reply envelope.
///
/// # Errors
/// Returns an error only if `result_info` cannot be encoded, which does not
/// happen for values produced by [`ResultInfo::success`] or
/// [`ResultInfo::failure`].
pub fn reply_message(
    response_uuid: ResponseUuid,
    result_info: &ResultInfo,
) -> serde_json::Result<Message> {
    #[derive(Serialize)]
    struct SendResponseArgs<'a> {
        response_uuid: ResponseUuid,
        result_info: &'a ResultInfo,
    }
    Message::new(
        "send_response",
        &SendResponseArgs {
            response_uuid,
            result_info,
        },
    )
}

/// Fields stripped from an instance record before it is broadcast, beyond
/// the private cache field which is carried separately and re-attached
/// under `info_cache`.
pub const INSTANCE_UPDATE_BLACKLIST: &[&str] = &["_sa_instance_state", "metadata"];

/// An instance record as held locally: its uuid, a flat map of the fields
/// eligible for broadcast, and an optional private cache value that is
/// never broadcast under its original key.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// The instance's unique identifier.
    pub uuid: InstanceUuid,
    /// All other instance fields.
    pub fields: Map<String, Value>,
    /// The private info-cache value, if loaded.
    pub cache: Option<Value>,
}

/// Builds the inner `instance_update` message: a filtered copy of the
/// instance record with its cache, if any, re-attached under `info_cache`.
///
/// # Errors
/// Returns an error only if the instance payload cannot be encoded.
pub fn instance_update_message(instance: &InstanceRecord) -> serde_json::Result<Message> {
    let mut payload = instance.fields.clone();
    for field in INSTANCE_UPDATE_BLACKLIST {
        payload.remove(*field);
    }
    payload.insert(
        "uuid".to_string(),
        Value::String(instance.uuid.as_ref().to_string()),
    );
    if let Some(cache) = &instance.cache {
        payload.insert("info_cache".to_string(), cache.clone());
    }
    Message::new("instance_update", &Value::Object(payload))
}

/// Builds the inner `instance_destroy` message: just the instance's uuid.
///
/// # Errors
/// Returns an error only if the uuid cannot be encoded.
pub fn instance_destroy_message(uuid: &InstanceUuid) -> serde_json::Result<Message> {
    #[derive(Serialize)]
    struct DestroyArgs<'a> {
        uuid: &'a InstanceUuid,
    }
    Message::new("instance_destroy", &DestroyArgs { uuid })
}

/// Wraps an [`instance_update_message`] in an upward, zero-hop broadcast
/// envelope.
///
/// # Errors
/// Returns an error only if the instance payload cannot be encoded.
pub fn instance_update_envelope(instance: &InstanceRecord) -> serde_json::Result<Envelope> {
    let message = instance_update_message(instance)?;
    Ok(broadcast_envelope(
        Direction::Up,
        message,
        None,
        HopCount::default(),
        false,
    ))
}

/// Wraps an [`instance_destroy_message`] in an upward, zero-hop broadcast
/// envelope.
///
/// # Errors
/// Returns an error only if the uuid cannot be encoded.
pub fn instance_destroy_envelope(uuid: &InstanceUuid) -> serde_json::Result<Envelope> {
    let message = instance_destroy_message(uuid)?;
    Ok(broadcast_envelope(
        Direction::Up,
        message,
        None,
        HopCount::default(),
        false,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn zone(name: &str) -> ZoneName {
        ZoneName::try_new(name.to_string()).unwrap()
    }

    #[test]
    fn routing_envelope_round_trips_through_json() {
        let message = Message::new("test_method", &json!({"kwarg1": 10})).unwrap();
        let envelope = routing_envelope(zone("a.b.c"), Direction::Down, message, None, true, Some(ResponseUuid::generate()));

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn reply_message_carries_failure_triple() {
        let result_info = ResultInfo::failure("RuntimeError", "boom", "trace...");
        let message = reply_message(ResponseUuid::generate(), &result_info).unwrap();
        assert_eq!(message.method, "send_response");
    }

    #[test]
    fn instance_update_strips_blacklist_and_reattaches_cache() {
        let mut fields = Map::new();
        fields.insert("task_state".to_string(), json!("spawning"));
        fields.insert("metadata".to_string(), json!({"noisy": true}));
        let instance = InstanceRecord {
            uuid: InstanceUuid::try_new("u-1".to_string()).unwrap(),
            fields,
            cache: Some(json!({"network": "flat"})),
        };

        let message = instance_update_message(&instance).unwrap();
        let args = message.args.as_object().unwrap();
        assert!(!args.contains_key("metadata"));
        assert_eq!(args["info_cache"], json!({"network": "flat"}));
        assert_eq!(args["uuid"], json!("u-1"));
    }

    #[test]
    fn instance_destroy_carries_only_uuid() {
        let uuid = InstanceUuid::try_new("u-2".to_string()).unwrap();
        let message = instance_destroy_message(&uuid).unwrap();
        assert_eq!(message.args, json!({"uuid": "u-2"}));
    }
}
