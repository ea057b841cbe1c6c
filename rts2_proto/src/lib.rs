//! Wire codec and typed value catalogue for the RTS2 line protocol.
//!
//! This crate owns everything that is purely about *representation*: how a
//! line of the protocol is tokenized, how a typed value renders to and
//! parses from its wire form, and the bit layouts of the device/BOP/system
//! state words. It has no notion of sockets, connections or dispatch —
//! those live in `rts2_device`.
pub mod codec;
pub mod error;
pub mod state;
pub mod value;

pub use error::ProtoError;
