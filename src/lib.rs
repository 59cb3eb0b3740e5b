pub mod client;
pub mod core;
pub mod server;
pub mod services;
pub mod utils;
