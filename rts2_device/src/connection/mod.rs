pub mod conn;
pub mod manager;
pub mod types;

pub use conn::{fire_due, CommandCallback, Connection, DueCallback, DueCallbacks, LineOutcome};
pub use manager::ConnectionManager;
pub use types::{
    ConnId, ConnKind, ConnState, CENTRALD_PREAUTH_TIMEOUT, CONNECTING_TIMEOUT, DEFAULT_COMMAND_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    INTEREST_RETRY_INTERVAL,
};
