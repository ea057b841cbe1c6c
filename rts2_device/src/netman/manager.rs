//! The network runtime: listener accept loop, outbound centrald/peer
//! connects, and command dispatch (spec.md §4.4).
//!
//! Grounded on the teacher's `node.rs` thread-per-connection shape
//! (`iniciar_recepcion_clientes`) and `client_struct::client::Client`'s
//! writer-thread-behind-a-channel pattern. Every table mutation still goes
//! through `ConnectionManager`'s single mutex; reader threads call back
//! into `NetworkManager` with already-split lines rather than holding any
//! lock themselves.
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rts2_logger::Logger;
use rts2_proto::codec::LineSplitter;

use crate::commands::{CommandRegistry, InterestCallbacks, RuntimeContext};
use crate::connection::{
    fire_due, ConnId, ConnKind, ConnState, Connection, ConnectionManager, DEFAULT_IDLE_TIMEOUT,
};
use crate::device::Device;
use crate::entity::EntityRegistry;
use crate::error::DeviceError;
use crate::log_msg::*;

type CentraldConnectedCallback = Box<dyn Fn(ConnId) + Send + Sync>;

/// Shared runtime used by every listener/reader/ticker thread. Kept behind
/// an `Arc` and cloned per thread rather than handed out as `&'static`.
pub struct NetworkManager {
    pub device: Arc<Device>,
    pub conn_mgr: Arc<ConnectionManager>,
    pub entities: Arc<EntityRegistry>,
    pub interests: Arc<InterestCallbacks>,
    pub registry: Arc<CommandRegistry>,
    pub logger: Logger,

    next_id: AtomicU64,
    device_name: String,
    device_type: i32,
    listen_port: Mutex<u16>,
    our_auth_key: Mutex<Option<i64>>,

    /// centrald-issued client id -> the listening-client connection waiting
    /// on that id's `authorization_ok`.
    pending_client_auth: Mutex<std::collections::HashMap<i64, ConnId>>,
    /// Fired once our own registration with centrald reaches AUTH_OK.
    centrald_connected_callback: Mutex<Option<CentraldConnectedCallback>>,

    listener: Mutex<Option<TcpListener>>,
}

impl NetworkManager {
    pub fn new(device: Arc<Device>, logger: Logger, device_name: impl Into<String>, device_type: i32) -> Arc<Self> {
        let mut registry = CommandRegistry::new();
        crate::commands::install_builtin_handlers(&mut registry);
        Arc::new(NetworkManager {
            device,
            conn_mgr: Arc::new(ConnectionManager::new()),
            entities: Arc::new(EntityRegistry::new()),
            interests: Arc::new(InterestCallbacks::new()),
            registry: Arc::new(registry),
            logger,
            next_id: AtomicU64::new(1),
            device_name: device_name.into(),
            device_type,
            listen_port: Mutex::new(0),
            our_auth_key: Mutex::new(None),
            pending_client_auth: Mutex::new(std::collections::HashMap::new()),
            centrald_connected_callback: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    pub fn on_centrald_connected(&self, f: impl Fn(ConnId) + Send + Sync + 'static) {
        *self.centrald_connected_callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(f));
    }

    pub fn listen_port(&self) -> u16 {
        *self.listen_port.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ctx(&self) -> RuntimeContext {
        RuntimeContext {
            device: self.device.clone(),
            conn_mgr: self.conn_mgr.clone(),
            entities: self.entities.clone(),
            interests: self.interests.clone(),
            logger: self.logger.clone(),
        }
    }

    fn next_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Binds the listener and spawns the accept-loop thread. Returns the
    /// actual bound port (useful when `bind_addr`'s port is 0).
    pub fn listen(self: &Arc<Self>, bind_addr: SocketAddr) -> Result<u16, DeviceError> {
        let listener = TcpListener::bind(bind_addr).map_err(|e| DeviceError::new_bind_error(bind_addr, e, "NETMAN"))?;
        let actual_addr = listener.local_addr().unwrap_or(bind_addr);
        *self.listen_port.lock().unwrap_or_else(|e| e.into_inner()) = actual_addr.port();
        log_listener_started(&self.logger, actual_addr);

        let accept_listener = listener.try_clone().map_err(|e| DeviceError::new_bind_error(bind_addr, e, "NETMAN"))?;
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);

        let nm = self.clone();
        thread::spawn(move || {
            for incoming in accept_listener.incoming() {
                match incoming {
                    Ok(stream) => {
                        if let Err(e) = nm.accept_inbound(stream) {
                            log_accept_error(&nm.logger, &e.to_string());
                        }
                    }
                    Err(e) => log_accept_error(&nm.logger, &e.to_string()),
                }
            }
        });

        Ok(actual_addr.port())
    }

    /// Connects a dummy local socket to unblock a thread parked in
    /// `TcpListener::accept`, the standard trick for a clean shutdown of an
    /// otherwise uninterruptible accept loop.
    pub fn stop_listening(&self) {
        let addr = {
            let guard = self.listener.lock().unwrap_or_else(|e| e.into_inner());
            guard.as_ref().and_then(|l| l.local_addr().ok())
        };
        if let Some(addr) = addr {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(200));
        }
    }

    /// Spawns the periodic keepalive/stale-connection sweep thread.
    pub fn spawn_ticker(self: &Arc<Self>) {
        let nm = self.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(15));
            nm.conn_mgr.sweep_keepalive();
            let closed = nm.conn_mgr.sweep_stale(&nm.logger);
            if !closed.is_empty() {
                let mut pending = nm.pending_client_auth.lock().unwrap_or_else(|e| e.into_inner());
                pending.retain(|_, conn_id| !closed.contains(conn_id));
            }
        });
    }

    fn spawn_writer_thread(rx: Receiver<String>, mut stream: TcpStream, logger: Logger, id: ConnId) {
        thread::spawn(move || {
            for line in rx {
                log_send(&logger, id, &line);
                if stream.write_all(line.as_bytes()).is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_reader_thread(self: &Arc<Self>, id: ConnId, mut stream: TcpStream) {
        let nm = self.clone();
        thread::spawn(move || {
            let mut splitter = LineSplitter::new();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        nm.handle_connection_closed(id, "peer closed the connection");
                        break;
                    }
                    Ok(n) => {
                        for line in splitter.feed(&buf[..n]) {
                            nm.handle_line(id, &line);
                        }
                    }
                    Err(e) => {
                        nm.handle_connection_closed(id, &e.to_string());
                        break;
                    }
                }
            }
        });
    }

    fn accept_inbound(self: &Arc<Self>, stream: TcpStream) -> Result<ConnId, DeviceError> {
        let remote_addr = stream.peer_addr()?;
        let id = self.next_id();
        let writer_stream = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;
        let (tx, rx) = mpsc::channel();
        Self::spawn_writer_thread(rx, writer_stream, self.logger.clone(), id);

        let mut conn = Connection::new(id, ConnKind::ListeningClient, remote_addr, tx, DEFAULT_IDLE_TIMEOUT);
        conn.state = ConnState::Connected;
        self.conn_mgr.add(conn);
        log_connection_accepted(&self.logger, id, remote_addr);

        let mut lines = self.device.meta_info_lines();
        lines.push(format!("S {} ", self.device.state()));
        self.conn_mgr.with_mut(id, |c| {
            for line in &lines {
                let _ = c.send_message(line);
            }
        });

        self.spawn_reader_thread(id, reader_stream);
        Ok(id)
    }

    /// Opens the outbound connection to centrald and begins the
    /// register/key/authorization_ok handshake (spec.md §4.4).
    pub fn connect_centrald(self: &Arc<Self>, addr: SocketAddr) -> Result<ConnId, DeviceError> {
        let stream = TcpStream::connect(addr).map_err(|e| DeviceError::new_connect_error(e, "NETMAN"))?;
        let id = self.next_id();
        let writer_stream = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;
        let (tx, rx) = mpsc::channel();
        Self::spawn_writer_thread(rx, writer_stream, self.logger.clone(), id);

        let mut conn = Connection::new(id, ConnKind::OutboundCentrald, addr, tx, crate::connection::CENTRALD_PREAUTH_TIMEOUT);
        conn.state = ConnState::Connected;
        self.conn_mgr.add(conn);

        let register_line = format!("register 0 {} {} localhost {}", self.device_name, self.device_type, self.listen_port());
        self.conn_mgr.with_mut(id, |c| {
            let _ = c.send_message(&register_line);
            c.state = ConnState::AuthPending;
        });
        log_auth_transition(&self.logger, id, "AUTH_PENDING");

        self.spawn_reader_thread(id, reader_stream);
        Ok(id)
    }

    /// Opens an outbound authenticated peer-device connection (interest
    /// manager use, spec.md §4.8).
    pub fn connect_peer(self: &Arc<Self>, name: &str, addr: SocketAddr) -> Result<ConnId, DeviceError> {
        let our_centrald_id = self
            .conn_mgr
            .authenticated_centrald()
            .and_then(|cid| self.conn_mgr.with_mut(cid, |c| c.centrald_id))
            .flatten()
            .ok_or_else(|| DeviceError::new_authorization_error("no authenticated centrald connection yet", "NETMAN"))?;
        let our_key = self
            .our_auth_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or_else(|| DeviceError::new_authorization_error("no auth key issued by centrald yet", "NETMAN"))?;

        let stream = TcpStream::connect(addr).map_err(|e| DeviceError::new_connect_error(e, "NETMAN"))?;
        let id = self.next_id();
        let writer_stream = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;
        let (tx, rx) = mpsc::channel();
        Self::spawn_writer_thread(rx, writer_stream, self.logger.clone(), id);

        let mut conn = Connection::new(id, ConnKind::PeerDevice, addr, tx, DEFAULT_IDLE_TIMEOUT);
        conn.state = ConnState::Connected;
        conn.remote_device_name = Some(name.to_string());
        self.conn_mgr.add(conn);

        let auth_line = format!("auth {our_centrald_id} 0 {our_key}");
        self.conn_mgr.with_mut(id, |c| {
            let _ = c.send_message(&auth_line);
            c.state = ConnState::AuthPending;
        });

        self.spawn_reader_thread(id, reader_stream);
        Ok(id)
    }

    fn handle_connection_closed(&self, id: ConnId, reason: &str) {
        if let Some(mut conn) = self.conn_mgr.remove(id) {
            fire_due(conn.close(reason));
        }
        log_connection_closed(&self.logger, id, reason);
        self.pending_client_auth.lock().unwrap_or_else(|e| e.into_inner()).retain(|_, v| *v != id);
    }

    fn handle_line(self: &Arc<Self>, id: ConnId, line: &str) {
        let outcome = self.conn_mgr.with_mut(id, |c| c.handle_line(line));
        match outcome {
            Some(crate::connection::LineOutcome::Response(due)) => fire_due(due),
            Some(crate::connection::LineOutcome::Command(tokens)) => self.dispatch_tokens(id, tokens),
            None => {}
        }
    }

    fn dispatch_tokens(self: &Arc<Self>, id: ConnId, tokens: Vec<String>) {
        let Some(token) = tokens.first().cloned() else {
            return;
        };
        let params = &tokens[1..];
        match token.as_str() {
            "auth" => self.handle_incoming_auth(id, params),
            "registered_as" => self.handle_registered_as(id, params),
            "authorization_key" => self.handle_authorization_key(params),
            "authorization_ok" => {
                if let Some(auth_id) = params.first().and_then(|s| s.parse().ok()) {
                    self.handle_authorization_ok_value(id, auth_id);
                } else {
                    log_malformed_line(&self.logger, &tokens.join(" "));
                }
            }
            // Open question resolved (spec.md §9): `A authorization_ok <id>`
            // is accepted the same as a bare `authorization_ok <id>`.
            "A" if params.first().map(String::as_str) == Some("authorization_ok") => {
                if let Some(auth_id) = params.get(1).and_then(|s| s.parse().ok()) {
                    self.handle_authorization_ok_value(id, auth_id);
                } else {
                    log_malformed_line(&self.logger, &tokens.join(" "));
                }
            }
            _ => self.registry.dispatch(&self.ctx(), id, &tokens),
        }
    }

    /// `auth <id> <num> <key>` from a client on a listening connection:
    /// relay `authorize <id> <key>` to centrald on the client's behalf.
    fn handle_incoming_auth(&self, client_conn_id: ConnId, params: &[String]) {
        let (Some(id), Some(num), Some(key)) = (
            params.first().and_then(|s| s.parse::<i64>().ok()),
            params.get(1).and_then(|s| s.parse::<i32>().ok()),
            params.get(2).and_then(|s| s.parse::<i64>().ok()),
        ) else {
            log_malformed_line(&self.logger, &format!("auth {}", params.join(" ")));
            return;
        };

        self.conn_mgr.with_mut(client_conn_id, |c| {
            c.centrald_id = Some(id);
            c.centrald_num = Some(num);
            c.auth_key = Some(key);
            c.state = ConnState::AuthPending;
        });
        log_auth_transition(&self.logger, client_conn_id, "AUTH_PENDING");

        match self.conn_mgr.authenticated_centrald() {
            Some(centrald_conn) => {
                self.pending_client_auth
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(id, client_conn_id);
                self.conn_mgr.with_mut(centrald_conn, |c| {
                    let _ = c.send_message(&format!("authorize {id} {key}"));
                });
            }
            None => {
                self.conn_mgr.with_mut(client_conn_id, |c| {
                    let _ = c.send_message("-1 Authorization service not available");
                });
                self.handle_connection_closed(client_conn_id, "no centrald connection at auth time");
            }
        }
    }

    /// `registered_as <id>` from centrald: record our own id and request
    /// our authorization key.
    fn handle_registered_as(&self, centrald_conn_id: ConnId, params: &[String]) {
        let Some(id) = params.first().and_then(|s| s.parse::<i64>().ok()) else {
            log_malformed_line(&self.logger, &format!("registered_as {}", params.join(" ")));
            return;
        };
        self.conn_mgr.with_mut(centrald_conn_id, |c| {
            c.centrald_id = Some(id);
            c.saw_registered_as = true;
            let _ = c.send_message(&format!("key {}", self.device_name));
        });
    }

    /// `authorization_key <name> <key>` from centrald: this is our own
    /// device's key, used later for outbound peer-device `auth`.
    fn handle_authorization_key(&self, params: &[String]) {
        let Some(key) = params.get(1).and_then(|s| s.parse::<i64>().ok()) else {
            log_malformed_line(&self.logger, &format!("authorization_key {}", params.join(" ")));
            return;
        };
        *self.our_auth_key.lock().unwrap_or_else(|e| e.into_inner()) = Some(key);
    }

    /// `authorization_ok <id>` (or `A authorization_ok <id>`) from centrald.
    /// Disambiguates between our own registration completing and a pending
    /// client's authorization completing by comparing `id` against the
    /// centrald connection's own recorded id.
    fn handle_authorization_ok_value(&self, centrald_conn_id: ConnId, auth_id: i64) {
        let is_ourselves = self
            .conn_mgr
            .with_mut(centrald_conn_id, |c| c.centrald_id)
            .flatten()
            .map(|our_id| our_id == auth_id)
            .unwrap_or(false);

        if is_ourselves {
            let became_ok = self
                .conn_mgr
                .with_mut(centrald_conn_id, |c| {
                    c.saw_authorization_ok = true;
                    if c.saw_registered_as {
                        c.state = ConnState::AuthOk;
                    }
                    c.state == ConnState::AuthOk
                })
                .unwrap_or(false);
            if became_ok {
                log_auth_transition(&self.logger, centrald_conn_id, "AUTH_OK");
                // Open question resolved (spec.md §9): invoked through the
                // network manager's own callback slot, not a device-level one.
                if let Some(cb) = self.centrald_connected_callback.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                    cb(centrald_conn_id);
                }
            }
            return;
        }

        self.complete_client_authorization(auth_id);
    }

    fn complete_client_authorization(&self, client_centrald_id: i64) {
        let Some(client_conn_id) = self
            .pending_client_auth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&client_centrald_id)
        else {
            return;
        };

        let mut lines = self.device.meta_info_lines();
        lines.push(format!("S {} ", self.device.state()));
        lines.push("+0 OK authorized".to_string());

        self.conn_mgr.with_mut(client_conn_id, |c| {
            c.state = ConnState::AuthOk;
            for line in &lines {
                let _ = c.send_message(line);
            }
        });
        log_auth_transition(&self.logger, client_conn_id, "AUTH_OK");
    }

    pub fn shutdown(&self, reason: &str) {
        self.conn_mgr.close_all(reason);
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicBool;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn new_nm(name: &str) -> Arc<NetworkManager> {
        NetworkManager::new(Arc::new(Device::new(Logger::null())), Logger::null(), name, 0)
    }

    #[test]
    fn accept_inbound_sends_meta_info_and_state() {
        let nm = new_nm("filterd");
        let port = nm.listen(addr(0)).unwrap();

        let stream = TcpStream::connect(addr(port)).unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("S "), "expected a state line first, got {line:?}");
    }

    #[test]
    fn register_handshake_completes_and_fires_callback() {
        let nm = new_nm("filterd");

        let centrald = TcpListener::bind(addr(0)).unwrap();
        let centrald_addr = centrald.local_addr().unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        nm.on_centrald_connected(move |_id| fired_clone.store(true, Ordering::SeqCst));

        nm.connect_centrald(centrald_addr).unwrap();

        let (sock, _) = centrald.accept().unwrap();
        let mut reader = BufReader::new(sock.try_clone().unwrap());
        let mut writer = sock;

        let mut register_line = String::new();
        reader.read_line(&mut register_line).unwrap();
        assert!(register_line.starts_with("register 0 filterd 0 localhost"));

        writer.write_all(b"registered_as 42\n").unwrap();
        let mut key_request = String::new();
        reader.read_line(&mut key_request).unwrap();
        assert_eq!(key_request.trim_end(), "key filterd");

        writer.write_all(b"authorization_key filterd 777\n").unwrap();
        writer.write_all(b"authorization_ok 42\n").unwrap();

        for _ in 0..50 {
            if fired.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(fired.load(Ordering::SeqCst), "centrald_connected callback never fired");
        assert_eq!(nm.conn_mgr.authenticated_centrald().and_then(|id| nm.conn_mgr.with_mut(id, |c| c.state)), Some(ConnState::AuthOk));
    }

    /// Reads lines for up to half a second, collecting whatever arrives;
    /// used where the exact number/ordering of preamble lines doesn't
    /// matter, only whether a particular line eventually shows up.
    fn drain_lines(stream: &TcpStream, budget: Duration) -> Vec<String> {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let deadline = std::time::Instant::now() + budget;
        let mut lines = Vec::new();
        while std::time::Instant::now() < deadline {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => lines.push(line.trim_end().to_string()),
                Err(_) => {}
            }
        }
        lines
    }

    #[test]
    fn client_auth_is_relayed_and_completed() {
        let nm = new_nm("filterd");
        let port = nm.listen(addr(0)).unwrap();

        let centrald = TcpListener::bind(addr(0)).unwrap();
        let centrald_addr = centrald.local_addr().unwrap();
        nm.connect_centrald(centrald_addr).unwrap();
        let (centrald_sock, _) = centrald.accept().unwrap();
        centrald_sock.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut centrald_reader = BufReader::new(centrald_sock.try_clone().unwrap());
        let mut centrald_writer = centrald_sock;
        let mut discard = String::new();
        centrald_reader.read_line(&mut discard).unwrap(); // register
        centrald_writer.write_all(b"registered_as 1\n").unwrap();
        centrald_reader.read_line(&mut discard).unwrap(); // key
        centrald_writer.write_all(b"authorization_key filterd 555\n").unwrap();
        centrald_writer.write_all(b"authorization_ok 1\n").unwrap();
        thread::sleep(Duration::from_millis(100));

        let client = TcpStream::connect(addr(port)).unwrap();
        drain_lines(&client, Duration::from_millis(200)); // meta-info + state preamble

        let mut client_writer = client.try_clone().unwrap();
        client_writer.write_all(b"auth 99 0 4242\n").unwrap();

        let mut authorize_line = String::new();
        centrald_reader.read_line(&mut authorize_line).unwrap();
        assert_eq!(authorize_line.trim_end(), "authorize 99 4242");

        centrald_writer.write_all(b"authorization_ok 99\n").unwrap();

        let reply_lines = drain_lines(&client, Duration::from_millis(300));
        assert!(reply_lines.iter().any(|l| l == "+0 OK authorized"), "client never received its authorization confirmation, got {reply_lines:?}");
    }
}
