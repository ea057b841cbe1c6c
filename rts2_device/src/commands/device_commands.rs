//! The device's own built-in command group: `info`, `base_info`,
//! `device_status` (spec.md §4.7).
use super::context::RuntimeContext;
use super::registry::HandlerGroup;
use crate::connection::ConnId;

pub struct DeviceCommandGroup;

impl HandlerGroup for DeviceCommandGroup {
    fn commands(&self) -> &[&'static str] {
        &["info", "base_info", "device_status"]
    }

    fn needs_response(&self, _token: &str) -> bool {
        true
    }

    fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, token: &str, _params: &[String]) -> (bool, String) {
        match token {
            "info" => {
                let lines = ctx.device.handle_info();
                ctx.conn_mgr.with_mut(conn_id, |c| {
                    for line in &lines {
                        let _ = c.send_message(line);
                    }
                });
                (true, "OK".to_string())
            }
            "base_info" => (true, "OK".to_string()),
            "device_status" => {
                let line = ctx.device.handle_device_status();
                ctx.conn_mgr.with_mut(conn_id, |c| {
                    let _ = c.send_message(&line);
                });
                (true, "OK".to_string())
            }
            _ => (false, "unreachable".to_string()),
        }
    }
}
