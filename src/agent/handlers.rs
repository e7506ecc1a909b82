//! Caller-supplied event handlers and the task that invokes them
//!
//! Session notifications arrive over a bounded channel and are handed to
//! the handlers one at a time, in arrival order, by a single dispatcher
//! task per agent.

use crate::protocol::edge::MessageReceived;
use crate::session::SessionEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Capacity of the notification channel between session and dispatcher
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(MessageReceived) + Send + Sync>;

#[derive(Default)]
pub struct EventHandlers {
    on_connect: RwLock<Option<LifecycleHandler>>,
    on_disconnect: RwLock<Option<LifecycleHandler>>,
    on_message: RwLock<Option<MessageHandler>>,
}

impl EventHandlers {
    pub fn set_on_connect(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.on_connect.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn set_on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self
            .on_disconnect
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn set_on_message(&self, handler: impl Fn(MessageReceived) + Send + Sync + 'static) {
        *self.on_message.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Invoke the handler registered for `event`, if any
    pub fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                let handler = self
                    .on_connect
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
            SessionEvent::Disconnected => {
                let handler = self
                    .on_disconnect
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
            SessionEvent::MessageReceived(message) => {
                let handler = self
                    .on_message
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(message),
                    None => debug!("No message handler registered, dropping message"),
                }
            }
        }
    }
}

/// Spawn the dispatcher draining `events` into `handlers`
///
/// A panicking handler is logged and the dispatcher moves on to the next
/// event.
pub fn spawn_dispatcher(
    mut events: mpsc::Receiver<SessionEvent>,
    handlers: Arc<EventHandlers>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let kind = event.kind();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handlers.dispatch(event))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(event = kind, reason = %reason, "Event handler panicked");
            }
        }
        debug!("Event dispatcher finished");
    })
}
