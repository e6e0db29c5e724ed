pub mod common;
pub mod config;
pub mod protocol;
pub mod providers;
pub mod queue;
pub mod session;
pub mod stream;
pub mod transport;
