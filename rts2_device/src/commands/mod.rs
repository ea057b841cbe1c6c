pub mod context;
pub mod device_commands;
pub mod protocol_handlers;
pub mod registry;

pub use context::{InterestCallbacks, RuntimeContext};
pub use registry::{CommandRegistry, HandlerGroup};

/// Registers every built-in handler group in the order spec.md §4.5
/// expects them to claim tokens.
pub fn install_builtin_handlers(registry: &mut CommandRegistry) {
    registry.register(Box::new(protocol_handlers::StateHandlerGroup));
    registry.register(Box::new(protocol_handlers::ValueNotifyHandlerGroup));
    registry.register(Box::new(protocol_handlers::KeepaliveHandlerGroup));
    registry.register(Box::new(protocol_handlers::MessageHandlerGroup));
    registry.register(Box::new(protocol_handlers::ValueWriteHandlerGroup));
    registry.register(Box::new(protocol_handlers::EntityHandlerGroup));
    registry.register(Box::new(protocol_handlers::IgnoredAnnouncementHandlerGroup));
    registry.register(Box::new(device_commands::DeviceCommandGroup));
}
