pub mod health_handlers;
pub mod thumbnail_handlers;
