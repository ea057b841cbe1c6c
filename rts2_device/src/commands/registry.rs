//! Ordered handler-group dispatch (spec.md §4.5, and the duck-typing fix
//! from §9: a common `HandlerGroup` trait instead of object-identity
//! dispatch).
use super::context::RuntimeContext;
use crate::connection::ConnId;
use crate::log_msg::log_dispatch_error;

pub trait HandlerGroup: Send + Sync {
    /// Tokens this group claims. A token may be claimed by more than one
    /// group (spec.md §4.5); they fire in registration order.
    fn commands(&self) -> &[&'static str];

    /// Whether the registry owes the peer a framed `+0`/`-1` reply for this
    /// token. Tokens that send their own inline reply (e.g. `T ready` ->
    /// `T OK`) or none at all return `false` here.
    fn needs_response(&self, token: &str) -> bool;

    /// Handles one claim of the token. Returns `(success, text)`; `text` is
    /// used as the registry's framed reply body when a response is owed.
    fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, token: &str, params: &[String]) -> (bool, String);
}

#[derive(Default)]
pub struct CommandRegistry {
    groups: Vec<Box<dyn HandlerGroup>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, group: Box<dyn HandlerGroup>) {
        self.groups.push(group);
    }

    /// Dispatches one already-tokenized command line.
    pub fn dispatch(&self, ctx: &RuntimeContext, conn_id: ConnId, tokens: &[String]) {
        let Some(token) = tokens.first() else {
            return;
        };
        let params = &tokens[1..];

        let matching: Vec<&Box<dyn HandlerGroup>> = self.groups.iter().filter(|g| g.commands().contains(&token.as_str())).collect();

        if matching.is_empty() {
            crate::log_msg::log_unknown_command(&ctx.logger, token);
            ctx.conn_mgr.with_mut(conn_id, |c| {
                let _ = c.send_message(&format!("-1 Unknown command: {token}"));
            });
            return;
        }

        let needs_response = matching[0].needs_response(token);
        let mut any_success = false;
        let mut last_text = String::new();

        for group in &matching {
            let (success, text) = group.dispatch(ctx, conn_id, token, params);
            if success {
                any_success = true;
                last_text = text;
            } else {
                if !text.is_empty() {
                    log_dispatch_error(&ctx.logger, token, &text);
                }
                last_text = text;
            }
        }

        if needs_response {
            let reply = if any_success {
                format!("+0 {last_text}")
            } else {
                format!("-1 {last_text}")
            };
            ctx.conn_mgr.with_mut(conn_id, |c| {
                let _ = c.send_message(&reply);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::context::InterestCallbacks;
    use crate::connection::{ConnKind, Connection};
    use crate::device::Device;
    use crate::entity::EntityRegistry;
    use rts2_logger::Logger;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    struct AlwaysOk;
    impl HandlerGroup for AlwaysOk {
        fn commands(&self) -> &[&'static str] {
            &["PING"]
        }
        fn needs_response(&self, _token: &str) -> bool {
            true
        }
        fn dispatch(&self, _ctx: &RuntimeContext, _conn_id: ConnId, _token: &str, _params: &[String]) -> (bool, String) {
            (true, "pong".to_string())
        }
    }

    struct RecordsCalls {
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        name: &'static str,
    }
    impl HandlerGroup for RecordsCalls {
        fn commands(&self) -> &[&'static str] {
            &["MULTI"]
        }
        fn needs_response(&self, _token: &str) -> bool {
            false
        }
        fn dispatch(&self, _ctx: &RuntimeContext, _conn_id: ConnId, _token: &str, _params: &[String]) -> (bool, String) {
            self.order.lock().unwrap().push(self.name);
            (true, String::new())
        }
    }

    fn test_ctx() -> (RuntimeContext, ConnId, mpsc::Receiver<String>) {
        let conn_mgr = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::channel();
        let conn = Connection::new(1, ConnKind::ListeningClient, "127.0.0.1:1".parse().unwrap(), tx, Duration::from_secs(300));
        conn_mgr.add(conn);
        let ctx = RuntimeContext {
            device: Arc::new(Device::new(Logger::null())),
            conn_mgr,
            entities: Arc::new(EntityRegistry::new()),
            interests: Arc::new(InterestCallbacks::new()),
            logger: Logger::null(),
        };
        (ctx, 1, rx)
    }
    use crate::connection::ConnectionManager;

    #[test]
    fn wraps_successful_response_as_plus_zero() {
        let (ctx, conn_id, rx) = test_ctx();
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(AlwaysOk));
        registry.dispatch(&ctx, conn_id, &["PING".to_string()]);
        assert_eq!(rx.try_recv().unwrap(), "+0 pong\n");
    }

    #[test]
    fn unknown_command_gets_minus_one() {
        let (ctx, conn_id, rx) = test_ctx();
        let registry = CommandRegistry::new();
        registry.dispatch(&ctx, conn_id, &["NOPE".to_string()]);
        assert_eq!(rx.try_recv().unwrap(), "-1 Unknown command: NOPE\n");
    }

    #[test]
    fn multiple_groups_for_same_token_fire_in_registration_order() {
        let (ctx, conn_id, _rx) = test_ctx();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(RecordsCalls { order: order.clone(), name: "first" }));
        registry.register(Box::new(RecordsCalls { order: order.clone(), name: "second" }));
        registry.dispatch(&ctx, conn_id, &["MULTI".to_string()]);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
