//! A single TCP endpoint: lifecycle state, in-flight command slot, and the
//! FIFO of commands queued behind it.
//!
//! Writes go out through a channel to a dedicated writer thread, the same
//! shape as the teacher's `client_struct::client::Client`. Reads are owned
//! by whichever thread holds the raw socket (the listener/connect thread
//! that spawned this connection); this struct only ever sees already-split
//! lines handed to it by that thread via `handle_line`.
//!
//! Command-completion callbacks are never invoked inline: every method
//! that would complete one returns the due callbacks instead, so the
//! caller can fire them after releasing `ConnectionManager`'s lock. Firing
//! a callback that itself calls back into the manager while the manager's
//! own lock is still held would deadlock.
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use rts2_proto::codec::{classify_line, LineKind};

use super::types::{ConnId, ConnKind, ConnState};
use crate::error::DeviceError;

pub type CommandCallback = Box<dyn FnOnce(bool, i32, &str) + Send>;

pub struct InFlightCommand {
    pub text: String,
    pub deadline: Instant,
    pub callback: Option<CommandCallback>,
}

pub struct QueuedCommand {
    pub text: String,
    pub timeout: Duration,
    pub callback: Option<CommandCallback>,
}

/// A callback plus the arguments it's due to be invoked with, deferred
/// until the caller has released any lock it's holding.
pub struct DueCallback {
    pub callback: CommandCallback,
    pub success: bool,
    pub code: i32,
    pub text: String,
}

pub type DueCallbacks = Vec<DueCallback>;

/// Invokes every due callback. Call this only after releasing whatever
/// lock produced the `DueCallbacks`.
pub fn fire_due(due: DueCallbacks) {
    for d in due {
        (d.callback)(d.success, d.code, &d.text);
    }
}

/// Outcome of handing a freshly split line to a connection.
pub enum LineOutcome {
    /// The line was a `+`/`-` response; these are the callbacks it and any
    /// newly-dequeued command completed.
    Response(DueCallbacks),
    /// The line is a command/notification the caller must dispatch.
    Command(Vec<String>),
}

pub struct Connection {
    pub id: ConnId,
    pub kind: ConnKind,
    pub state: ConnState,
    pub remote_addr: SocketAddr,
    sender: Sender<String>,

    pub remote_device_name: Option<String>,
    pub centrald_id: Option<i64>,
    pub centrald_num: Option<i32>,
    pub auth_key: Option<i64>,
    pub peer_state: u32,
    pub peer_bop: u32,
    pub progress: Option<(f64, f64)>,

    pub last_activity: Instant,
    pub connected_at: Instant,

    in_flight: Option<InFlightCommand>,
    queue: VecDeque<QueuedCommand>,

    pub idle_timeout: Duration,
    /// Whether `registered_as` has been observed (outbound centrald only).
    pub saw_registered_as: bool,
    /// Whether `authorization_ok` has been observed (outbound centrald only).
    pub saw_authorization_ok: bool,
}

impl Connection {
    pub fn new(id: ConnId, kind: ConnKind, remote_addr: SocketAddr, sender: Sender<String>, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        Connection {
            id,
            kind,
            state: ConnState::Connecting,
            remote_addr,
            sender,
            remote_device_name: None,
            centrald_id: None,
            centrald_num: None,
            auth_key: None,
            peer_state: 0,
            peer_bop: 0,
            progress: None,
            last_activity: now,
            connected_at: now,
            in_flight: None,
            queue: VecDeque::new(),
            idle_timeout,
            saw_registered_as: false,
            saw_authorization_ok: false,
        }
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Enqueues raw bytes for transmit; the wire protocol is line-oriented
    /// so callers almost always want `send_message`.
    pub fn send(&self, bytes: &[u8]) -> Result<(), DeviceError> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.sender
            .send(text)
            .map_err(|e| DeviceError::new_send_error(std::io::Error::other(e.to_string()), "CONN"))
    }

    pub fn send_message(&self, text: &str) -> Result<(), DeviceError> {
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.sender
            .send(line)
            .map_err(|e| DeviceError::new_send_error(std::io::Error::other(e.to_string()), "CONN"))
    }

    /// Issues a command. If none is in flight, transmits immediately and
    /// occupies the in-flight slot; otherwise, if `queue_if_busy`, appends
    /// to the FIFO; otherwise fails without transmitting.
    pub fn send_command(
        &mut self,
        text: &str,
        callback: Option<CommandCallback>,
        queue_if_busy: bool,
        timeout: Duration,
    ) -> Result<(), DeviceError> {
        if self.in_flight.is_none() {
            self.send_message(text)?;
            self.in_flight = Some(InFlightCommand {
                text: text.to_string(),
                deadline: Instant::now() + timeout,
                callback,
            });
            Ok(())
        } else if queue_if_busy {
            self.queue.push_back(QueuedCommand {
                text: text.to_string(),
                timeout,
                callback,
            });
            Ok(())
        } else {
            Err(DeviceError::new_send_error(
                std::io::Error::other("command already in flight"),
                "CONN",
            ))
        }
    }

    /// Classifies a freshly received line. `+`/`-` lines complete the
    /// in-flight command and pop the next queued one (if any); anything
    /// else is returned for the caller to dispatch.
    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        self.touch();
        match classify_line(line) {
            LineKind::Success { code, text } => LineOutcome::Response(self.complete_in_flight(true, code, &text)),
            LineKind::Failure { code, text } => LineOutcome::Response(self.complete_in_flight(false, code, &text)),
            LineKind::Command(tokens) => LineOutcome::Command(tokens),
        }
    }

    fn complete_in_flight(&mut self, success: bool, code: i32, text: &str) -> DueCallbacks {
        let mut due = Vec::new();
        if let Some(cmd) = self.in_flight.take() {
            if let Some(cb) = cmd.callback {
                due.push(DueCallback {
                    callback: cb,
                    success,
                    code,
                    text: text.to_string(),
                });
            }
        }
        due.extend(self.pop_next_queued());
        due
    }

    fn pop_next_queued(&mut self) -> DueCallbacks {
        let mut due = Vec::new();
        while self.in_flight.is_none() {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            if self.send_message(&next.text).is_ok() {
                self.in_flight = Some(InFlightCommand {
                    text: next.text,
                    deadline: Instant::now() + next.timeout,
                    callback: next.callback,
                });
            } else if let Some(cb) = next.callback {
                due.push(DueCallback {
                    callback: cb,
                    success: false,
                    code: -1,
                    text: "send failed while draining queue".to_string(),
                });
            }
        }
        due
    }

    /// Returns the deadline callback (if the in-flight command overran its
    /// timeout) plus whatever the resulting queue drain completed.
    pub fn check_command_deadline(&mut self) -> DueCallbacks {
        let expired = self.in_flight.as_ref().map(|c| Instant::now() >= c.deadline).unwrap_or(false);
        if !expired {
            return Vec::new();
        }
        let mut due = Vec::new();
        if let Some(cmd) = self.in_flight.take() {
            if let Some(cb) = cmd.callback {
                due.push(DueCallback {
                    callback: cb,
                    success: false,
                    code: -1,
                    text: "timed out".to_string(),
                });
            }
        }
        due.extend(self.pop_next_queued());
        due
    }

    /// Sends a keepalive `T ready` if idle for more than a quarter of the
    /// configured timeout. Returns `true` if one was sent.
    pub fn check_keepalive(&mut self) -> bool {
        if self.last_activity.elapsed() > self.idle_timeout / 4 {
            let _ = self.send_message("T ready");
            true
        } else {
            false
        }
    }

    pub fn is_timed_out(&self) -> bool {
        let age = self.connected_at.elapsed();
        if self.kind == ConnKind::OutboundCentrald && self.state != ConnState::AuthOk && age > Duration::from_secs(60) {
            return true;
        }
        if self.state == ConnState::Connecting && age > Duration::from_secs(10) {
            return true;
        }
        self.last_activity.elapsed() > self.idle_timeout * 2
    }

    /// Transitions to BROKEN. Returns every pending callback (in-flight and
    /// queued), as no further response will ever arrive.
    pub fn close(&mut self, reason: &str) -> DueCallbacks {
        self.state = ConnState::Broken;
        let mut due = Vec::new();
        if let Some(cmd) = self.in_flight.take() {
            if let Some(cb) = cmd.callback {
                due.push(DueCallback {
                    callback: cb,
                    success: false,
                    code: -1,
                    text: reason.to_string(),
                });
            }
        }
        while let Some(cmd) = self.queue.pop_front() {
            if let Some(cb) = cmd.callback {
                due.push(DueCallback {
                    callback: cb,
                    success: false,
                    code: -1,
                    text: "Command timed out in queue".to_string(),
                });
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    fn test_conn() -> (Connection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let conn = Connection::new(
            1,
            ConnKind::PeerDevice,
            "127.0.0.1:1000".parse().unwrap(),
            tx,
            Duration::from_secs(300),
        );
        (conn, rx)
    }

    #[test]
    fn at_most_one_in_flight_and_queue_drains_in_fifo_order() {
        let (mut conn, rx) = test_conn();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c1 = calls.clone();
        conn.send_command(
            "CMD1",
            Some(Box::new(move |ok, code, text| c1.lock().unwrap().push((ok, code, text.to_string())))),
            true,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(conn.has_in_flight());

        let c2 = calls.clone();
        conn.send_command(
            "CMD2",
            Some(Box::new(move |ok, code, text| c2.lock().unwrap().push((ok, code, text.to_string())))),
            true,
            Duration::from_secs(5),
        )
        .unwrap();

        // still only one in flight; CMD1 was sent, CMD2 queued
        assert_eq!(rx.try_recv().unwrap(), "CMD1\n");
        assert!(rx.try_recv().is_err());

        match conn.handle_line("+0 ok") {
            LineOutcome::Response(due) => fire_due(due),
            LineOutcome::Command(_) => panic!("expected a response"),
        }
        assert_eq!(calls.lock().unwrap().as_slice(), [(true, 0, "ok".to_string())]);
        // CMD2 now transmitted as the new in-flight command
        assert_eq!(rx.try_recv().unwrap(), "CMD2\n");
        assert!(conn.has_in_flight());
    }

    #[test]
    fn deadline_fires_callback_and_clears_slot() {
        let (mut conn, _rx) = test_conn();
        conn.send_command("CMD", Some(Box::new(|_, _, _| {})), false, Duration::from_millis(0))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let due = conn.check_command_deadline();
        assert_eq!(due.len(), 1);
        assert_eq!((due[0].success, due[0].code, due[0].text.as_str()), (false, -1, "timed out"));
        assert!(!conn.has_in_flight());
    }

    #[test]
    fn close_fires_in_flight_and_queued_with_failure() {
        let (mut conn, _rx) = test_conn();
        for text in ["A", "B"] {
            conn.send_command(text, Some(Box::new(|_, _, _| {})), true, Duration::from_secs(5)).unwrap();
        }
        let due = conn.close("peer gone");
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|d| !d.success && d.code == -1));
        assert_eq!(conn.state, ConnState::Broken);
    }

    #[test]
    fn classify_response_vs_command() {
        let (mut conn, _rx) = test_conn();
        match conn.handle_line("X filter_sleep = 2.5") {
            LineOutcome::Command(tokens) => assert_eq!(tokens, vec!["X", "filter_sleep", "=", "2.5"]),
            _ => panic!("expected a command"),
        }
    }
}
