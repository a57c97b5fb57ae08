//! Persistent storage for the reel cache layer.

mod sled_backend;

pub use sled_backend::SledBackend;
