//! # Photo ML Sync
//!
//! Incremental, versioned face and text ML artifacts for photo libraries.
//!
//! ## Core Philosophy
//! - **Never redo work** - Every artifact records the method that produced it
//! - **Stable identity** - Face ids derive from geometry, so reuse is safe
//! - **Fail per file** - A broken file never corrupts the library corpus
//!
//! ## Architecture
//! The library is split into a core engine (GUI-agnostic) and presentation layers:
//! - `core` - The sync engine
//! - `events` - Event-driven progress reporting (GUI-ready)
//! - `error` - User-friendly error types
//! - `cli` - Command-line interface

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{MlSyncError, Result};

/// Initialize tracing for the library
///
/// This should be called by the application entry point (CLI or GUI).
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");
}
