//! Crate-level error type for the device runtime.
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum DeviceErrorKind {
    Lock,
    Bind,
    Connect,
    Send,
    Config,
    Registration,
    Authorization,
}

#[derive(Debug)]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub description: String,
    pub module: &'static str,
}

impl DeviceError {
    pub fn new_lock_error(module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Lock,
            description: "failed to acquire lock".to_string(),
            module,
        }
    }

    pub fn new_bind_error(addr: std::net::SocketAddr, e: io::Error, module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Bind,
            description: format!("failed to bind {addr}: {e}"),
            module,
        }
    }

    pub fn new_connect_error(e: io::Error, module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Connect,
            description: format!("failed to connect: {e}"),
            module,
        }
    }

    pub fn new_send_error(e: io::Error, module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Send,
            description: format!("failed to send: {e}"),
            module,
        }
    }

    pub fn new_config_error(message: impl Into<String>, module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Config,
            description: message.into(),
            module,
        }
    }

    pub fn new_registration_error(message: impl Into<String>, module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Registration,
            description: message.into(),
            module,
        }
    }

    pub fn new_authorization_error(message: impl Into<String>, module: &'static str) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Authorization,
            description: message.into(),
            module,
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.module, self.kind, self.description)
    }
}

impl std::error::Error for DeviceError {}

impl From<io::Error> for DeviceError {
    fn from(e: io::Error) -> Self {
        DeviceError {
            kind: DeviceErrorKind::Connect,
            description: e.to_string(),
            module: "IO",
        }
    }
}
