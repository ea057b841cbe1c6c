//! Shared state every handler group dispatches against. Grouping it here
//! (rather than giving handlers back-pointers to the NetworkManager) is the
//! cyclic-reference fix: handlers get a plain reference to shared state,
//! never an object-identity back-pointer into the owner.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rts2_logger::Logger;

use crate::connection::ConnectionManager;
use crate::device::Device;
use crate::entity::EntityRegistry;

type ValueCallback = Box<dyn Fn(&str) + Send + Sync>;
type StateCallback = Box<dyn Fn(u32, Option<u32>, &str) + Send + Sync>;
type MessageSink = Box<dyn Fn(i64, i64, i32, i32, &str) + Send + Sync>;

/// The interest set and the callback tables it drives: `"device.value"` ->
/// value callback, `"device"` -> state callback (spec.md §3).
#[derive(Default)]
pub struct InterestCallbacks {
    names: Mutex<std::collections::HashSet<String>>,
    value_callbacks: Mutex<HashMap<String, ValueCallback>>,
    state_callbacks: Mutex<HashMap<String, StateCallback>>,
    message_sink: Mutex<Option<MessageSink>>,
}

impl InterestCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, device_name: impl Into<String>) {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).insert(device_name.into());
    }

    pub fn interest_names(&self) -> Vec<String> {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    pub fn is_interesting(&self, device_name: &str) -> bool {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).contains(device_name)
    }

    pub fn on_value(&self, key: impl Into<String>, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.value_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), Box::new(callback));
    }

    pub fn on_state(&self, device_name: impl Into<String>, callback: impl Fn(u32, Option<u32>, &str) + Send + Sync + 'static) {
        self.state_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_name.into(), Box::new(callback));
    }

    pub fn set_message_sink(&self, sink: impl Fn(i64, i64, i32, i32, &str) + Send + Sync + 'static) {
        *self.message_sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(sink));
    }

    pub fn fire_value(&self, key: &str, rendering: &str) {
        if let Some(cb) = self.value_callbacks.lock().unwrap_or_else(|e| e.into_inner()).get(key) {
            cb(rendering);
        }
    }

    pub fn fire_state(&self, device_name: &str, state: u32, bop: Option<u32>, message: &str) {
        if let Some(cb) = self.state_callbacks.lock().unwrap_or_else(|e| e.into_inner()).get(device_name) {
            cb(state, bop, message);
        }
    }

    pub fn fire_message(&self, sec: i64, usec: i64, origin: i32, kind: i32, text: &str) {
        if let Some(sink) = self.message_sink.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            sink(sec, usec, origin, kind, text);
        }
    }
}

/// Everything a handler group needs to act: no ownership of sockets, just
/// the shared, lock-guarded runtime state.
pub struct RuntimeContext {
    pub device: Arc<Device>,
    pub conn_mgr: Arc<ConnectionManager>,
    pub entities: Arc<EntityRegistry>,
    pub interests: Arc<InterestCallbacks>,
    pub logger: Logger,
}
