//! Subprotocol handler registration.
//!
//! A handler owns a connection's application logic. It is invoked once per
//! connection after the handshake, with the inbound queue to read payloads
//! from and the outbound queue to write payloads to. Returning `Ok` ends the
//! connection with a server-initiated close once queued payloads are sent;
//! returning `Err` tears the connection down and is logged.
//!
//! # Example
//!
//! ```rust
//! use wavegate_server::handler::HandlerRegistry;
//! use wavegate_server::{Inbound, Outbound};
//! use wavegate_proto::HandlerError;
//!
//! async fn echo(mut input: Inbound, output: Outbound) -> Result<(), HandlerError> {
//!     while let Some(payload) = input.recv().await {
//!         output.send(payload).await?;
//!     }
//!     Ok(())
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("", echo);
//! assert!(registry.contains(""));
//! assert!(!registry.contains("chat"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use wavegate_proto::HandlerError;

use crate::queue::{Inbound, Outbound};

/// Future returned by a type-erased handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// A per-subprotocol connection handler.
pub trait Handler: Send + Sync + 'static {
    /// Run the handler for one connection.
    fn call(&self, inbound: Inbound, outbound: Outbound) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Inbound, Outbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, inbound: Inbound, outbound: Outbound) -> HandlerFuture {
        Box::pin(self(inbound, outbound))
    }
}

/// A shared, type-erased handler.
pub type SharedHandler = Arc<dyn Handler>;

/// Maps subprotocol names to handlers.
///
/// The empty string is a valid key and selects the handler for peers that
/// request no subprotocol.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, SharedHandler>,
}

impl HandlerRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for `subprotocol`.
    pub fn register<H: Handler>(&mut self, subprotocol: impl Into<String>, handler: H) {
        self.handlers.insert(subprotocol.into(), Arc::new(handler));
    }

    /// Returns `true` if a handler exists for `subprotocol`.
    #[must_use]
    pub fn contains(&self, subprotocol: &str) -> bool {
        self.handlers.contains_key(subprotocol)
    }

    /// Returns the handler for `subprotocol`.
    #[must_use]
    pub fn get(&self, subprotocol: &str) -> Option<SharedHandler> {
        self.handlers.get(subprotocol).cloned()
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns the registered subprotocol names.
    pub fn subprotocols(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("subprotocols", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
