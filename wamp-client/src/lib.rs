//! Client-side WAMP session engine: establishes a session against a
//! router over a pluggable transport, correlates in-flight RPC and
//! PubSub operations to their responses, and dispatches invocations and
//! events to application handlers — all from a single-owner dispatch
//! loop per session.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pubsub;
pub mod rpc;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::{ChallengeResponder, SessionConfig, SessionSettings};
pub use error::{Result, WampError};
pub use pubsub::{PublishOptions, SubscribeOptions, Subscription};
pub use rpc::{CallOptions, CallResult, RegisterOptions, Registration};
pub use session::{
    CallHandler, EventHandler, InvocationError, InvocationResult, Session, SessionState,
};
pub use transport::{connect_tcp, TransportEvent, TransportLink};
