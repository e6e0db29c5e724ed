pub mod http_server;
pub mod websocket;

use std::sync::Arc;

use crate::session::RadioManager;
use crate::stream::Broadcaster;

/// Shared handler state.
pub struct AppState {
    pub manager: Arc<RadioManager>,
    pub broadcaster: Arc<Broadcaster>,
}
