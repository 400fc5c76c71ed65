//! # huddle-server
//!
//! Real-time session gateway over axum WebSockets.
//!
//! - [`session`]: one client connection from accept to teardown
//! - [`subscription`]: per-session registry of cancellable live subscriptions
//! - [`translator`]: raw store changes → `"<kind> add|edit|remove"` events
//! - [`dispatcher`]: message name → handler table
//! - [`handlers`]: the channel / user / message catalog
//! - [`server`]: HTTP routes, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod outbound;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod subscription;
pub mod translator;
pub mod transport;

pub use config::{ConfigError, ServerConfig};
pub use dispatcher::Dispatcher;
pub use errors::{HandlerError, SessionError, TransportError};
pub use server::{GatewayServer, ServerHandle};
pub use session::Session;
pub use subscription::{SubscriptionKind, SubscriptionRegistry};
