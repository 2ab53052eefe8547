//! Event handler registry and dispatch

use crate::event::AmiEvent;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler return type.
pub type HandlerResult = Result<(), HandlerError>;

/// A registered event callback.
pub type EventHandler = Arc<dyn Fn(&AmiEvent) -> HandlerResult + Send + Sync>;

/// What a failing or panicking handler does to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerErrorPolicy {
    /// Log and keep reading.
    #[default]
    LogAndContinue,
    /// Log and disconnect.
    Disconnect,
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler registered for the event name ran successfully.
    Handled,
    /// The fallback handler ran successfully.
    Fallback,
    /// No handler and no fallback; the event was dropped.
    Dropped,
    /// The handler returned an error or panicked.
    Failed {
        /// Event name.
        event: String,
        /// Error text or panic message.
        message: String,
    },
}

/// Handler table: at most one handler per exact event name, plus a fallback.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, EventHandler>,
    fallback: Option<EventHandler>,
}

impl EventDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing and returning any previous one.
    pub fn register_handler(
        &mut self,
        event: impl Into<String>,
        handler: EventHandler,
    ) -> Option<EventHandler> {
        self.handlers
            .insert(event.into(), handler)
    }

    /// Remove the handler for `event`.
    pub fn unregister_handler(&mut self, event: &str) -> Option<EventHandler> {
        self.handlers
            .remove(event)
    }

    /// Set the handler for events with no specific handler.
    pub fn register_fallback_handler(&mut self, handler: EventHandler) -> Option<EventHandler> {
        self.fallback
            .replace(handler)
    }

    /// Remove the fallback handler.
    pub fn clear_fallback_handler(&mut self) -> Option<EventHandler> {
        self.fallback
            .take()
    }

    /// Whether a specific handler exists for `event` (exact match).
    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers
            .contains_key(event)
    }

    /// Handler that would run for `event`, and whether it is the fallback.
    pub fn resolve(&self, event: &str) -> Option<(EventHandler, bool)> {
        match self
            .handlers
            .get(event)
        {
            Some(handler) => Some((handler.clone(), false)),
            None => self
                .fallback
                .clone()
                .map(|h| (h, true)),
        }
    }

    /// Run the matching handler for `event`.
    pub fn dispatch(&self, event: &AmiEvent) -> DispatchOutcome {
        invoke(self.resolve(event.name()), event)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self
            .handlers
            .keys()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        f.debug_struct("EventDispatcher")
            .field("handlers", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

fn invoke(resolved: Option<(EventHandler, bool)>, event: &AmiEvent) -> DispatchOutcome {
    let Some((handler, is_fallback)) = resolved else {
        trace!("No handler for event {}, dropping", event.name());
        return DispatchOutcome::Dropped;
    };

    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {
            if is_fallback {
                DispatchOutcome::Fallback
            } else {
                DispatchOutcome::Handled
            }
        }
        Ok(Err(e)) => {
            warn!("Handler for event {} failed: {}", event.name(), e);
            DispatchOutcome::Failed {
                event: event
                    .name()
                    .to_string(),
                message: e.to_string(),
            }
        }
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!("Handler for event {} panicked: {}", event.name(), message);
            DispatchOutcome::Failed {
                event: event
                    .name()
                    .to_string(),
                message,
            }
        }
    }
}

/// Dispatcher shared between a client and its reader.
///
/// The lock is released before a handler runs, so handlers may register or
/// remove handlers (including themselves) without deadlocking.
#[derive(Debug, Clone, Default)]
pub struct SharedDispatcher {
    inner: Arc<Mutex<EventDispatcher>>,
}

impl SharedDispatcher {
    /// Empty shared dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventDispatcher> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the matching handler for `event` without holding the lock.
    pub fn dispatch(&self, event: &AmiEvent) -> DispatchOutcome {
        let resolved = self
            .lock()
            .resolve(event.name());
        let outcome = invoke(resolved, event);
        debug!("Dispatched {}: {:?}", event.name(), outcome);
        outcome
    }

    /// Whether a specific handler exists for `event`.
    pub fn has_handler(&self, event: &str) -> bool {
        self.lock()
            .has_handler(event)
    }
}

/// Event handler registration, shared by both client front ends.
///
/// Implementors only provide [`event_dispatcher`](Self::event_dispatcher).
pub trait EventSubscriber {
    /// Registry backing this connection.
    fn event_dispatcher(&self) -> &SharedDispatcher;

    /// Register `handler` for the exact event name `event`.
    ///
    /// A later registration for the same name replaces the earlier one.
    fn register_handler<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&AmiEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let event = event.into();
        debug!("Registering handler for {}", event);
        if self
            .event_dispatcher()
            .lock()
            .register_handler(event.clone(), Arc::new(handler))
            .is_some()
        {
            debug!("Replaced previous handler for {}", event);
        }
    }

    /// Remove the handler for `event`. Returns `true` if one was registered.
    fn unregister_handler(&self, event: &str) -> bool {
        self.event_dispatcher()
            .lock()
            .unregister_handler(event)
            .is_some()
    }

    /// Register the handler for events with no specific handler.
    fn register_fallback_handler<F>(&self, handler: F)
    where
        F: Fn(&AmiEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.event_dispatcher()
            .lock()
            .register_fallback_handler(Arc::new(handler));
    }

    /// Remove the fallback handler.
    fn clear_fallback_handler(&self) {
        self.event_dispatcher()
            .lock()
            .clear_fallback_handler();
    }
}

impl EventSubscriber for SharedDispatcher {
    fn event_dispatcher(&self) -> &SharedDispatcher {
        self
    }
}
