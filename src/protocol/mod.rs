pub mod messages;
pub mod models;

pub use messages::{IncomingMessage, OutgoingMessage};
pub use models::*;
