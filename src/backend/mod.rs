pub mod api;
pub mod cache;
pub mod client_config;
pub mod epub;
