//! Handler groups for the single-letter RTS2 protocol messages and the
//! entity-registry word commands (spec.md §4.5).
use super::context::RuntimeContext;
use super::registry::HandlerGroup;
use crate::connection::ConnId;
use crate::entity::{Entity, EntityKind};

/// `S`/`B`/`R`: cache the peer's state/BOP/progress on the connection and
/// fire the state-interest callback for its remote device name.
pub struct StateHandlerGroup;

impl HandlerGroup for StateHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["S", "B", "R"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        false
    }

    fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, token: &str, params: &[String]) -> (bool, String) {
        let Some(state) = params.first().and_then(|s| s.parse::<u32>().ok()) else {
            return (false, "malformed state update".to_string());
        };

        let remote_name = ctx.conn_mgr.with_mut(conn_id, |c| {
            match token {
                "B" => {
                    let bop = params.get(1).and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
                    c.peer_bop = bop;
                    c.peer_state = state;
                }
                "R" => {
                    let start = params.get(1).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                    let end = params.get(2).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                    c.progress = Some((start, end));
                    c.peer_state = state;
                }
                _ => c.peer_state = state,
            }
            c.remote_device_name.clone()
        });

        if let Some(name) = remote_name.flatten() {
            let message = params.last().cloned().unwrap_or_default();
            let bop = if token == "B" { params.get(1).and_then(|s| s.parse::<u32>().ok()) } else { None };
            ctx.interests.fire_state(&name, state, bop, &message);
        }
        (true, String::new())
    }
}

/// `V <name> <data>`: fire the value-interest callback for
/// `"<remote-device>.<name>"`.
pub struct ValueNotifyHandlerGroup;

impl HandlerGroup for ValueNotifyHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["V"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        false
    }

    fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, _token: &str, params: &[String]) -> (bool, String) {
        let Some(name) = params.first() else {
            return (false, "malformed value update".to_string());
        };
        let rendering = params[1..].join(" ");
        let remote_name = ctx.conn_mgr.with_mut(conn_id, |c| c.remote_device_name.clone()).flatten();
        if let Some(device_name) = remote_name {
            ctx.interests.fire_value(&format!("{device_name}.{name}"), &rendering);
        }
        (true, String::new())
    }
}

/// `T ready` -> `T OK`, sent inline rather than via the `+0`/`-1` wrapper.
pub struct KeepaliveHandlerGroup;

impl HandlerGroup for KeepaliveHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["T"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        false
    }

    fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, _token: &str, params: &[String]) -> (bool, String) {
        if params.first().map(String::as_str) == Some("ready") {
            ctx.conn_mgr.with_mut(conn_id, |c| {
                let _ = c.send_message("T OK");
            });
        }
        (true, String::new())
    }
}

/// `M <sec> <usec> <origin> <type> <text>`: forward to the process-wide
/// message sink, if one is registered.
pub struct MessageHandlerGroup;

impl HandlerGroup for MessageHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["M"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        false
    }

    fn dispatch(&self, ctx: &RuntimeContext, _conn_id: ConnId, _token: &str, params: &[String]) -> (bool, String) {
        let sec = params.first().and_then(|s| s.parse().ok()).unwrap_or(0);
        let usec = params.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
        let origin = params.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
        let kind = params.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
        let text = params.get(4..).map(|p| p.join(" ")).unwrap_or_default();
        ctx.interests.fire_message(sec, usec, origin, kind, &text);
        (true, String::new())
    }
}

/// `X <name> = <value>`: the one protocol letter that owes the peer a
/// framed response.
pub struct ValueWriteHandlerGroup;

impl HandlerGroup for ValueWriteHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["X"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        true
    }

    fn dispatch(&self, ctx: &RuntimeContext, _conn_id: ConnId, _token: &str, params: &[String]) -> (bool, String) {
        if params.len() < 3 || params[1] != "=" {
            return (false, "malformed X command".to_string());
        }
        let name = &params[0];
        let raw = params[2..].join(" ");

        use crate::device::ValueWriteOutcome;
        match ctx.device.handle_value_write(name, &raw) {
            ValueWriteOutcome::Applied { broadcast } => {
                ctx.conn_mgr.broadcast(&broadcast, None, crate::connection::ConnState::AuthOk);
                (true, format!("Value {name} changed"))
            }
            ValueWriteOutcome::Queued => (true, format!("Value {name} queued")),
            ValueWriteOutcome::NotFound => (false, format!("Unknown value: {name}")),
            ValueWriteOutcome::NotWritable => (false, format!("Value {name} is not writable")),
            ValueWriteOutcome::ParseError(msg) => (false, msg),
        }
    }
}

/// `device`/`client`/`this_device`/`delete_client`: entity-registry upkeep
/// and connection self-identification.
pub struct EntityHandlerGroup;

impl HandlerGroup for EntityHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["device", "client", "this_device", "delete_client"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        false
    }

    fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, token: &str, params: &[String]) -> (bool, String) {
        match token {
            "device" => {
                let Some(id) = params.get(1).and_then(|s| s.parse().ok()) else {
                    return (false, "malformed device announcement".to_string());
                };
                let name = params.get(2).cloned().unwrap_or_default();
                let host = params.get(3).cloned();
                let port = params.get(4).and_then(|s| s.parse().ok());
                let type_code = params.get(5).and_then(|s| s.parse().ok());
                ctx.entities.upsert(Entity {
                    id,
                    name,
                    kind: EntityKind::Device,
                    type_code,
                    host,
                    port,
                });
                (true, String::new())
            }
            "client" => {
                let Some(id) = params.first().and_then(|s| s.parse().ok()) else {
                    return (false, "malformed client announcement".to_string());
                };
                let name = params.get(1).cloned().unwrap_or_default();
                let type_code = params.get(2).and_then(|s| s.parse().ok());
                ctx.entities.upsert(Entity {
                    id,
                    name,
                    kind: EntityKind::Client,
                    type_code,
                    host: None,
                    port: None,
                });
                (true, String::new())
            }
            "this_device" => {
                let Some(name) = params.first().cloned() else {
                    return (false, "malformed this_device announcement".to_string());
                };
                ctx.conn_mgr.with_mut(conn_id, |c| c.remote_device_name = Some(name));
                (true, String::new())
            }
            "delete_client" => {
                let Some(id) = params.first().and_then(|s| s.parse().ok()) else {
                    return (false, "malformed delete_client".to_string());
                };
                ctx.entities.remove(id);
                (true, String::new())
            }
            _ => (false, "unreachable".to_string()),
        }
    }
}

/// `E`/`F`/`Z`/`delete_device`: metadata-announcement and entity-teardown
/// tokens that never require a response from the device side. Recognized
/// here purely so dispatch doesn't mistake them for an unknown command —
/// e.g. the `F` lines a peer's own meta-info burst sends for its SELECTION
/// values.
pub struct IgnoredAnnouncementHandlerGroup;

impl HandlerGroup for IgnoredAnnouncementHandlerGroup {
    fn commands(&self) -> &[&'static str] {
        &["E", "F", "Z", "delete_device"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        false
    }

    fn dispatch(&self, _ctx: &RuntimeContext, _conn_id: ConnId, _token: &str, _params: &[String]) -> (bool, String) {
        (true, String::new())
    }
}
