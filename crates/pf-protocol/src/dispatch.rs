//! Type-string to handler dispatch
//!
//! Incoming frames arrive as raw JSON. The [`Dispatcher`] validates the
//! envelope keys, then routes the message to the handler registered for its
//! `type` discriminant. Unknown types are logged and ignored; envelope and
//! payload errors drop the message. Nothing propagates past the dispatch
//! boundary.

use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::message::{ApiVersion, MessageKind, CURRENT_VERSION};

type Handler<C> = Box<dyn Fn(&mut C, serde_json::Value) -> Result<(), ProtocolError> + Send>;

/// Routes validated messages to per-type handlers operating on a context `C`
pub struct Dispatcher<C> {
    handlers: HashMap<&'static str, Handler<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for the payload type `M`
    pub fn register<M, F>(&mut self, handler: F)
    where
        M: MessageKind + 'static,
        F: Fn(&mut C, M) + Send + 'static,
    {
        self.handlers.insert(
            M::TYPE,
            Box::new(move |ctx, value| {
                let message: M =
                    serde_json::from_value(value).map_err(|e| ProtocolError::TypeMismatch {
                        expected: M::TYPE,
                        source: e,
                    })?;
                handler(ctx, message);
                Ok(())
            }),
        );
    }

    /// Validate and route one raw message; errors are logged, never returned
    pub fn dispatch(&self, ctx: &mut C, value: serde_json::Value) {
        if let Err(e) = self.try_dispatch(ctx, value) {
            tracing::warn!("dropping message: {e}");
        }
    }

    fn try_dispatch(&self, ctx: &mut C, value: serde_json::Value) -> Result<(), ProtocolError> {
        let message_type = validate(&value)?;
        match self.handlers.get(message_type) {
            Some(handler) => handler(ctx, value),
            None => {
                // Not an error; peers may know message types we do not
                tracing::debug!(r#type = message_type, "ignoring unknown message type");
                Ok(())
            }
        }
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the envelope keys of a raw message and return its type string
///
/// Requires a string `type` and an integer-triple `version` whose major
/// component matches ours.
pub fn validate(value: &serde_json::Value) -> Result<&str, ProtocolError> {
    let message_type = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MalformedEnvelope)?;

    let version = value.get("version").ok_or(ProtocolError::MalformedEnvelope)?;
    let version: ApiVersion =
        serde_json::from_value(version.clone()).map_err(|_| ProtocolError::MalformedEnvelope)?;

    if version[0] != CURRENT_VERSION[0] {
        return Err(ProtocolError::VersionMismatch {
            received: version,
            expected: CURRENT_VERSION[0],
        });
    }

    Ok(message_type)
}
