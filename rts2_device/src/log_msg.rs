//! Free functions wrapping `rts2_logger::Logger` for the runtime's recurring
//! log lines, so call sites read like a sentence instead of a format string.
use rts2_logger::Logger;
use std::net::SocketAddr;

pub fn log_bind_error(logger: &Logger, addr: SocketAddr, err: &str) {
    logger.error(&format!("failed to bind {addr}: {err}"), "NETMAN");
}

pub fn log_listener_started(logger: &Logger, addr: SocketAddr) {
    logger.info(&format!("listening on {addr}"), "NETMAN");
}

pub fn log_accept_error(logger: &Logger, err: &str) {
    logger.warn(&format!("accept failed: {err}"), "NETMAN");
}

pub fn log_connection_accepted(logger: &Logger, id: u64, addr: SocketAddr) {
    logger.info(&format!("connection {id} accepted from {addr}"), "NETMAN");
}

pub fn log_connection_closed(logger: &Logger, id: u64, reason: &str) {
    logger.info(&format!("connection {id} closed: {reason}"), "NETMAN");
}

pub fn log_auth_transition(logger: &Logger, id: u64, state: &str) {
    logger.info(&format!("connection {id} -> {state}"), "NETMAN");
}

pub fn log_dispatch_error(logger: &Logger, token: &str, err: &str) {
    logger.warn(&format!("handler for '{token}' failed: {err}"), "COMMANDS");
}

pub fn log_unknown_command(logger: &Logger, token: &str) {
    logger.warn(&format!("unknown command: {token}"), "COMMANDS");
}

pub fn log_malformed_line(logger: &Logger, line: &str) {
    logger.warn(&format!("malformed line: {line:?}"), "COMMANDS");
}

pub fn log_send(logger: &Logger, id: u64, text: &str) {
    logger.debug("sending line", "NETMAN", format_args!("conn {id}: {}", text.trim_end()));
}

pub fn log_state_change(logger: &Logger, old: u32, new: u32) {
    logger.info(&format!("state {old:#010x} -> {new:#010x}"), "DEVICE");
}

pub fn log_interest_connect(logger: &Logger, name: &str, addr: SocketAddr) {
    logger.info(&format!("opening interest connection to {name} at {addr}"), "INTEREST");
}
