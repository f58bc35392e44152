//! Process-wide, context-partitioned publish/subscribe bus.
//!
//! Command and event nodes consume this as their external input surface;
//! the dispatcher itself has no notion of nodes. Emission is synchronous
//! and listeners fire in registration order.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default context name used when callers don't specify one.
pub const GLOBAL_CONTEXT: &str = "global";

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Listener {
    id: u64,
    handler: Handler,
}

/// A `(context, event name)`-keyed pub/sub bus.
///
/// Contexts are independent namespaces: `on("x", ..., "a")` never fires for
/// `emit("x", ..., "b")`.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Mutex<HashMap<(String, String), Vec<Listener>>>,
    next_id: AtomicU64,
}

/// Handle returned by [`Dispatcher::on`]; dropping it does nothing, call
/// [`Unsubscribe::cancel`] (or `off`) to actually remove the listener.
pub struct Unsubscribe {
    dispatcher: Arc<Dispatcher>,
    key: (String, String),
    id: u64,
}

impl Unsubscribe {
    /// Removes the listener this handle was returned for.
    pub fn cancel(self) {
        let mut listeners = self.dispatcher.listeners.lock();
        if let Some(list) = listeners.get_mut(&self.key) {
            list.retain(|l| l.id != self.id);
        }
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` under `(context, name)`, returning a handle that
    /// removes it when [`Unsubscribe::cancel`] is called.
    pub fn on(
        self: &Arc<Self>,
        name: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
        context: Option<&str>,
    ) -> Unsubscribe {
        let key = (context.unwrap_or(GLOBAL_CONTEXT).to_string(), name.into());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push(Listener {
                id,
                handler: Arc::new(handler),
            });
        Unsubscribe {
            dispatcher: self.clone(),
            key,
            id,
        }
    }

    /// Removes all listeners under `(context, name)`. Prefer keeping the
    /// [`Unsubscribe`] handle from `on` for targeted removal; this is the
    /// blunt, name-based counterpart.
    pub fn off(&self, name: &str, context: Option<&str>) {
        let key = (context.unwrap_or(GLOBAL_CONTEXT).to_string(), name.to_string());
        self.listeners.lock().remove(&key);
    }

    /// Synchronously invokes every listener registered under
    /// `(context, name)`, in registration order.
    pub fn emit(&self, name: &str, payload: &Value, context: Option<&str>) {
        let key = (context.unwrap_or(GLOBAL_CONTEXT).to_string(), name.to_string());
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.lock();
            listeners
                .get(&key)
                .map(|l| l.iter().map(|x| x.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(payload);
        }
    }
}
