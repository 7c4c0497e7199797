//! chat-relay - a line-oriented TCP chat broadcast server
//!
//! Clients connect over TCP, pick a display name, and every non-empty line
//! they send is relayed to all connected clients (including the sender).
//!
//! # Architecture
//!
//! - One tokio task per connection runs that client's read loop
//! - A dedicated writer task per connection drains the session's outbound queue
//! - A shared [`registry::Registry`] tracks live sessions; broadcasting
//!   iterates an owned snapshot so fan-out never holds the membership lock

pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
