//! A keyed table of all active connections, guarded by a single mutex per
//! the thread-safety contract: callers must not hold the lock across
//! blocking I/O (the `send*` calls only push into the per-connection writer
//! channel, so holding the lock across them is safe and intentional).
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use super::conn::{fire_due, Connection};
use super::types::{ConnId, ConnKind, ConnState};
use rts2_logger::Logger;

#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<ConnId, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Connection) {
        let mut map = self.lock();
        map.insert(conn.id, conn);
    }

    pub fn remove(&self, id: ConnId) -> Option<Connection> {
        let mut map = self.lock();
        map.remove(&id)
    }

    /// Runs `f` against the connection with the given id, if present.
    pub fn with_mut<R>(&self, id: ConnId, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        let mut map = self.lock();
        map.get_mut(&id).map(f)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn ids_by_kind(&self, kind: ConnKind) -> Vec<ConnId> {
        self.lock().values().filter(|c| c.kind == kind).map(|c| c.id).collect()
    }

    pub fn ids_at_least(&self, min_state: ConnState) -> Vec<ConnId> {
        self.lock().values().filter(|c| c.state.at_least(min_state)).map(|c| c.id).collect()
    }

    pub fn find_by_remote_addr(&self, addr: SocketAddr) -> Option<ConnId> {
        self.lock().values().find(|c| c.remote_addr == addr).map(|c| c.id)
    }

    /// Looks up a peer-device connection whose remote name matches and
    /// whose state is AUTH_OK or AUTH_PENDING (used by the interest loop to
    /// decide whether a new connect attempt is needed).
    pub fn find_peer_by_name(&self, name: &str) -> Option<ConnId> {
        self.lock()
            .values()
            .find(|c| {
                c.kind == ConnKind::PeerDevice
                    && c.remote_device_name.as_deref() == Some(name)
                    && matches!(c.state, ConnState::AuthOk | ConnState::AuthPending)
            })
            .map(|c| c.id)
    }

    /// The single authenticated centrald connection, if any.
    pub fn authenticated_centrald(&self) -> Option<ConnId> {
        self.lock()
            .values()
            .find(|c| c.kind == ConnKind::OutboundCentrald && c.state == ConnState::AuthOk)
            .map(|c| c.id)
    }

    /// Sends `message` to every connection at least `min_state`, optionally
    /// restricted to one kind.
    pub fn broadcast(&self, message: &str, kind: Option<ConnKind>, min_state: ConnState) {
        let map = self.lock();
        for conn in map.values() {
            if let Some(k) = kind {
                if conn.kind != k {
                    continue;
                }
            }
            if conn.state.at_least(min_state) {
                let _ = conn.send_message(message);
            }
        }
    }

    pub fn close_all(&self, reason: &str) {
        let due = {
            let mut map = self.lock();
            let mut due = Vec::new();
            for conn in map.values_mut() {
                due.extend(conn.close(reason));
            }
            due
        };
        fire_due(due);
    }

    /// Keepalive sweep: connections idle more than a quarter of their
    /// timeout are sent `T ready`.
    pub fn sweep_keepalive(&self) {
        let mut map = self.lock();
        for conn in map.values_mut() {
            conn.check_keepalive();
        }
    }

    /// Stale-connection sweep: closes anything past its idle/connect
    /// timeout and fires deadline callbacks for overrun in-flight commands.
    /// Callbacks are fired only after the table lock is released, since a
    /// callback may itself call back into this manager. Returns the ids
    /// that were closed (so the caller can remove them from any
    /// higher-level reverse index, e.g. interest bookkeeping).
    pub fn sweep_stale(&self, logger: &Logger) -> Vec<ConnId> {
        let (closed, due) = {
            let mut map = self.lock();
            let mut closed = Vec::new();
            let mut due = Vec::new();
            for conn in map.values_mut() {
                due.extend(conn.check_command_deadline());
                if conn.is_timed_out() && !conn.state.is_terminal() {
                    logger.info(&format!("connection {} timed out, closing", conn.id), "CONNMGR");
                    due.extend(conn.close("idle timeout"));
                    closed.push(conn.id);
                }
            }
            map.retain(|_, c| c.state != ConnState::Delete);
            (closed, due)
        };
        fire_due(due);
        closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnId, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }
}
