//! Core data models for the thumbnail service.
//!
//! Presets are a fixed compile-time table. Uploads and artifacts only live
//! for the duration of a request; what persists is the encoded bytes in the
//! thumbnail store.

pub mod preset;
pub mod thumbnail;
