//! # huddle-core
//!
//! Foundation types shared by the store and the gateway server.
//!
//! - [`Message`]: the `{name, data}` envelope exchanged with clients
//! - [`ChangeEvent`] / [`Operation`]: classified record changes
//! - [`entities`]: `Channel`, `User`, `ChannelMessage` records and collection names
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod change;
pub mod entities;
pub mod logging;
pub mod message;

pub use change::{ChangeEvent, Operation};
pub use message::Message;
