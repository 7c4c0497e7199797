//! Server module - TCP listener and per-connection session handling

mod listener;
mod session;

pub use listener::ServerListener;
pub use session::{writer_task, Session, OUTBOUND_BUFFER};
