//! Thumbnail generation, orchestration and storage.

pub mod generator;
pub mod storage_service;
pub mod thumbnail_service;
