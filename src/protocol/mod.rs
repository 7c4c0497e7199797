//! Wire protocol for the chat relay
//!
//! The protocol is plain UTF-8 text: one message per `\n`-terminated line.
//! There is no framing, no message ids, and a single client command
//! ([`QUIT_COMMAND`]). Everything here is a pure function over strings so the
//! formatting rules can be tested without sockets.

/// Default TCP port when neither CLI nor config file say otherwise.
pub const DEFAULT_PORT: u16 = 5000;

/// The one client command: disconnects the session. Matched case-insensitively.
pub const QUIT_COMMAND: &str = "/quit";

/// First line sent to every new connection.
pub const NAME_PROMPT: &str = "Welcome! Please enter your name:";

/// Returns true if a trimmed input line is the quit command.
pub fn is_quit(line: &str) -> bool {
    line.eq_ignore_ascii_case(QUIT_COMMAND)
}

/// Display name for a client that never supplied a usable one, derived from
/// the peer's ephemeral port so it is unique enough to tell guests apart.
pub fn fallback_name(peer_port: u16) -> String {
    format!("Guest-{}", peer_port)
}

/// Apply the naming rules: trim the proposed name, and fall back when
/// nothing usable remains.
pub fn choose_name(proposed: &str, fallback: &str) -> String {
    let trimmed = proposed.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Greeting sent to a client once its name is settled.
pub fn greeting(name: &str) -> String {
    format!("Hi {}! Type messages to chat. Type /quit to exit.", name)
}

/// Notice broadcast when a client finishes the handshake.
pub fn join_notice(name: &str) -> String {
    format!("{} has joined the chat.", name)
}

/// Notice broadcast when a client disconnects, for any reason.
pub fn leave_notice(name: &str) -> String {
    format!("{} has left the chat.", name)
}

/// A relayed chat message, prefixed with the sender's name.
pub fn chat_line(name: &str, text: &str) -> String {
    format!("{}: {}", name, text)
}
