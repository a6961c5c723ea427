//! Image thumbnail service: accepts an upload, renders it at five fixed
//! sizes in PNG and WebP, stores the results and serves them back.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
