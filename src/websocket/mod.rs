pub mod handler;
pub mod msg_code_change_handler;
pub mod msg_join_handler;
pub mod msg_ping_handler;
pub mod msg_sync_code_handler;

pub use handler::websocket_handler;
