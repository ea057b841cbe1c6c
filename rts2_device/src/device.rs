//! Device core: the 32-bit state word, the separate BOP word, the progress
//! window, the value catalogue, and the queued-value buffer used while a
//! writable value's write arrives mid-busy.
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rts2_logger::Logger;
use rts2_proto::value::{Catalogue, Value, ValueData};

use crate::error::DeviceError;

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub enum ValueWriteOutcome {
    /// Applied immediately; `broadcast` is the `V <name> <rendering>` line.
    Applied { broadcast: String },
    /// Buffered because the device currently wants this value queued.
    Queued,
    NotFound,
    NotWritable,
    ParseError(String),
}

struct PendingWrites {
    order: Vec<String>,
    raw: std::collections::HashMap<String, String>,
}

impl PendingWrites {
    fn new() -> Self {
        PendingWrites {
            order: Vec::new(),
            raw: std::collections::HashMap::new(),
        }
    }

    fn push(&mut self, name: &str, raw_value: &str) {
        if !self.raw.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.raw.insert(name.to_string(), raw_value.to_string());
    }
}

struct Inner {
    state: u32,
    bop: u32,
    progress: Option<(f64, f64)>,
    catalogue: Catalogue,
    pending: PendingWrites,
}

pub struct Device {
    inner: Mutex<Inner>,
    should_queue_value: Box<dyn Fn(&str) -> bool + Send + Sync>,
    info_hook: Option<Box<dyn Fn(&Device) + Send + Sync>>,
    state_changed_hook: Option<Box<dyn Fn(u32, u32) + Send + Sync>>,
    client_change_hook: Option<Box<dyn Fn(&str) + Send + Sync>>,
    logger: Logger,
}

impl Device {
    pub fn new(logger: Logger) -> Self {
        let mut catalogue = Catalogue::new();
        catalogue.insert(Value::new_time("infotime", "time of last info update", None));
        catalogue.insert(Value::new_time("uptime", "time of the device startup", Some(now_secs())));
        Device {
            inner: Mutex::new(Inner {
                state: 0,
                bop: 0,
                progress: None,
                catalogue,
                pending: PendingWrites::new(),
            }),
            should_queue_value: Box::new(|_| false),
            info_hook: None,
            state_changed_hook: None,
            client_change_hook: None,
            logger,
        }
    }

    pub fn with_should_queue_value(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.should_queue_value = Box::new(f);
        self
    }

    pub fn with_info_hook(mut self, f: impl Fn(&Device) + Send + Sync + 'static) -> Self {
        self.info_hook = Some(Box::new(f));
        self
    }

    pub fn with_state_changed_hook(mut self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.state_changed_hook = Some(Box::new(f));
        self
    }

    pub fn with_client_change_hook(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.client_change_hook = Some(Box::new(f));
        self
    }

    pub fn register_value(&self, value: Value) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.catalogue.insert(value);
    }

    pub fn state(&self) -> u32 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn bop(&self) -> u32 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).bop
    }

    pub fn progress(&self) -> Option<(f64, f64)> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).progress
    }

    /// The full `M`/`F`/`V` announcement stream for every registered value,
    /// in declaration order (the meta-info block).
    pub fn meta_info_lines(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut lines = Vec::new();
        for value in inner.catalogue.iter() {
            lines.push(format!("M {} \"{}\" \"{}\"", value.meta_type_bits(), value.name(), value.description()));
            if let Some(labels) = value.selection_labels() {
                lines.push(format!("F \"{}\"", value.name()));
                for label in labels {
                    lines.push(format!("F \"{}\" \"{}\"", value.name(), label));
                }
            }
            lines.push(format!("V {} {}", value.name(), value.render()));
        }
        lines
    }

    pub fn render_value(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.catalogue.get(name).map(|v| v.render())
    }

    /// Applies a driver-originated local change. Returns the broadcast
    /// line if the value actually changed.
    pub fn set_local_value(&self, name: &str, data: ValueData) -> Result<Option<String>, DeviceError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(value) = inner.catalogue.get_mut(name) else {
            return Err(DeviceError::new_config_error(format!("unknown value '{name}'"), "DEVICE"));
        };
        let changed = value
            .set_local(data)
            .map_err(|e| DeviceError::new_config_error(e.to_string(), "DEVICE"))?;
        Ok(changed.then(|| format!("V {} {}", name, value.render())))
    }

    /// Handles an `X <name> = <raw>` request from a peer, per §4.6/§4.7.
    pub fn handle_value_write(&self, name: &str, raw: &str) -> ValueWriteOutcome {
        let queue_now = (self.should_queue_value)(name);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let Some(value) = inner.catalogue.get(name) else {
            return ValueWriteOutcome::NotFound;
        };
        if !value.is_writable() {
            return ValueWriteOutcome::NotWritable;
        }

        if queue_now {
            inner.pending.push(name, raw);
            drop(inner);
            if let Some(hook) = &self.client_change_hook {
                hook(name);
            }
            return ValueWriteOutcome::Queued;
        }

        let value = inner.catalogue.get_mut(name).expect("checked above");
        match value.update_from_network(raw) {
            Ok(_changed) => {
                let rendering = value.render();
                drop(inner);
                if let Some(hook) = &self.client_change_hook {
                    hook(name);
                }
                ValueWriteOutcome::Applied {
                    broadcast: format!("V {name} {rendering}"),
                }
            }
            Err(e) => ValueWriteOutcome::ParseError(e.to_string()),
        }
    }

    /// Drains every queued write that is no longer subject to
    /// `should_queue_value`, applying and rendering each in FIFO order.
    fn drain_queue(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut still_pending_order = Vec::new();
        let names = std::mem::take(&mut inner.pending.order);
        for name in names {
            if (self.should_queue_value)(&name) {
                still_pending_order.push(name);
                continue;
            }
            let Some(raw) = inner.pending.raw.remove(&name) else {
                continue;
            };
            if let Some(value) = inner.catalogue.get_mut(&name) {
                if value.update_from_network(&raw).is_ok() {
                    lines.push(format!("V {} {}", name, value.render()));
                }
            }
        }
        inner.pending.order = still_pending_order;
        lines
    }

    /// `set_state` per §4.7: update the word, drain, broadcast `S`/`B`,
    /// drain again, then invoke the state-changed hook. Always drains even
    /// when `new_state`/`new_bop` are unchanged from the current values —
    /// the early-return present in the source this is modeled on is not
    /// reproduced.
    pub fn set_state(&self, new_state: u32, message: &str, new_bop: Option<u32>) -> Vec<String> {
        let old_state;
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            old_state = inner.state;
            inner.state = new_state;
            if let Some(bop) = new_bop {
                inner.bop = bop;
            }
        }

        let mut lines = self.drain_queue();

        let bop_now = self.bop();
        if new_bop.is_some() {
            lines.push(format!("B {new_state} {bop_now} {message}"));
        } else {
            lines.push(format!("S {new_state} {message}"));
        }

        lines.extend(self.drain_queue());

        if let Some(hook) = &self.state_changed_hook {
            hook(old_state, new_state);
        }
        self.logger.info(&format!("state {old_state:#010x} -> {new_state:#010x}"), "DEVICE");
        lines
    }

    pub fn set_progress_state(&self, new_state: u32, start: f64, end: f64, message: &str) -> Vec<String> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.state = new_state;
            inner.progress = Some((start, end));
        }
        let mut lines = self.drain_queue();
        lines.push(format!("R {new_state} {start} {end} {message}"));
        lines.extend(self.drain_queue());
        lines
    }

    /// Built-in `info` command: runs the info hook (if any), stamps
    /// `infotime`, and returns every value's `V` line followed by the
    /// current `S` line — the response body for the requester.
    pub fn handle_info(&self) -> Vec<String> {
        if let Some(hook) = &self.info_hook {
            hook(self);
        }
        let _ = self.set_local_value("infotime", ValueData::Time(now_secs()));

        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut lines: Vec<String> = inner.catalogue.iter().map(|v| format!("V {} {}", v.name(), v.render())).collect();
        lines.push(format!("S {} ", inner.state));
        lines
    }

    pub fn handle_device_status(&self) -> String {
        format!("S {} ", self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_state_drains_queue_before_and_after_the_state_line() {
        let device = Device::new(Logger::null()).with_should_queue_value(|name| name == "focstep");
        device.register_value(Value::new_integer("focstep", "focuser step", Some(0)).with_writable(true));

        match device.handle_value_write("focstep", "3") {
            ValueWriteOutcome::Queued => {}
            _ => panic!("expected the write to be queued while busy"),
        }
        assert_eq!(device.render_value("focstep").unwrap(), "0");

        let device = device.with_should_queue_value(|_| false);
        let lines = device.set_state(0, "idle", None);
        assert_eq!(lines[0], "V focstep 3");
        assert_eq!(lines[1], "S 0 idle");
        assert_eq!(device.render_value("focstep").unwrap(), "3");
    }

    #[test]
    fn set_state_drains_even_when_state_is_unchanged() {
        let device = Device::new(Logger::null());
        let first = device.set_state(0, "m", None);
        let second = device.set_state(0, "m", None);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0], "S 0 m");
    }

    #[test]
    fn non_writable_value_is_rejected() {
        let device = Device::new(Logger::null());
        device.register_value(Value::new_integer("ro", "", Some(1)));
        match device.handle_value_write("ro", "2") {
            ValueWriteOutcome::NotWritable => {}
            _ => panic!("expected NotWritable"),
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        let device = Device::new(Logger::null());
        match device.handle_value_write("nope", "2") {
            ValueWriteOutcome::NotFound => {}
            _ => panic!("expected NotFound"),
        }
    }

    #[test]
    fn writable_value_applies_and_broadcasts() {
        let device = Device::new(Logger::null());
        device.register_value(Value::new_double("filter_sleep", "", Some(0.0)).with_writable(true));
        match device.handle_value_write("filter_sleep", "2.5") {
            ValueWriteOutcome::Applied { broadcast } => {
                assert!(broadcast.starts_with("V filter_sleep 2.5"));
            }
            _ => panic!("expected Applied"),
        }
    }

    #[test]
    fn meta_info_includes_selection_enumerators() {
        let device = Device::new(Logger::null());
        device.register_value(Value::new_selection("filter", "filter wheel", vec!["B".into(), "V".into()], 0));
        let lines = device.meta_info_lines();
        assert!(lines.iter().any(|l| l == "F \"filter\""));
        assert!(lines.iter().any(|l| l == "F \"filter\" \"B\""));
        assert!(lines.iter().any(|l| l == "F \"filter\" \"V\""));
    }
}
