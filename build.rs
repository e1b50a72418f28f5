//! Build script for the zone fabric crate.
//!
//! Ensures the crate is recompiled when migration files change, which the
//! `SQLx` `migrate!()` macro needs in order to detect schema changes.

/// Tells Cargo to rerun the build when files in the migrations directory change.
fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
