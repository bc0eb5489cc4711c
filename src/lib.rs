pub mod board;
pub mod config;
pub mod errors;
pub mod events;
pub mod logging;
pub mod server;
