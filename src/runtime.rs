//! The injectable process context: schedulers, dispatcher, and registries
//! bundled together so an application can either use a shared global
//! instance or construct an isolated one per test/tenant.

use crate::dispatcher::Dispatcher;
use crate::key::{KeyGenerator, RandomKeyGenerator};
use crate::registry::{EncoderRegistry, TypeRegistry};
use crate::scheduler::{MicrotaskScheduler, Scheduler, SchedulerContext, SyncScheduler};
use std::sync::{Arc, OnceLock};

/// Everything a node needs beyond its own state: where to schedule
/// recomputation, where to schedule subscriber notification, the event
/// bus backing command/event nodes, and the type/encoder registries.
///
/// Fully injectable — nothing here is hidden global state unless a caller
/// chooses [`Context::global`].
pub struct Context {
    update: Arc<SchedulerContext>,
    notify: Arc<dyn Scheduler>,
    dispatcher: Arc<Dispatcher>,
    types: Arc<TypeRegistry>,
    encoders: Arc<EncoderRegistry>,
    keys: Arc<dyn KeyGenerator>,
}

impl Context {
    /// Builds a context from explicit components. Prefer [`Context::default`]
    /// unless a caller needs non-default schedulers or registries.
    pub fn new(
        update_scheduler: Arc<dyn Scheduler>,
        notify_scheduler: Arc<dyn Scheduler>,
        dispatcher: Arc<Dispatcher>,
        types: Arc<TypeRegistry>,
        encoders: Arc<EncoderRegistry>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            update: SchedulerContext::new(update_scheduler),
            notify: notify_scheduler,
            dispatcher,
            types,
            encoders,
            keys,
        })
    }

    /// The process-wide default, built on first use: a microtask update
    /// scheduler, a synchronous notify scheduler, an empty dispatcher, and
    /// registries pre-populated with their built-in tags/encoders.
    ///
    /// Most applications never need more than this; construct a private
    /// [`Context`] only for test isolation or multi-tenant hosting.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Context>> = OnceLock::new();
        GLOBAL.get_or_init(Self::default_context).clone()
    }

    fn default_context() -> Arc<Self> {
        Self::new(
            Arc::new(MicrotaskScheduler),
            Arc::new(SyncScheduler),
            Dispatcher::new(),
            Arc::new(TypeRegistry::with_builtins()),
            Arc::new(EncoderRegistry::new()),
            Arc::new(RandomKeyGenerator),
        )
    }

    /// The pending-set/batch context used to coalesce recomputation.
    pub fn update(&self) -> &Arc<SchedulerContext> {
        &self.update
    }

    /// The scheduler used to defer subscriber notification. Kept distinct
    /// from `update` so a caller can, for example, recompute eagerly on the
    /// microtask scheduler but notify subscribers synchronously.
    pub fn notify(&self) -> &Arc<dyn Scheduler> {
        &self.notify
    }

    /// The shared event bus backing command/event nodes.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The type-tag validator registry.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// The value-encoding registry.
    pub fn encoders(&self) -> &Arc<EncoderRegistry> {
        &self.encoders
    }

    /// The key generator used when constructing nodes without an explicit
    /// key.
    pub fn keys(&self) -> &Arc<dyn KeyGenerator> {
        &self.keys
    }

    /// Runs `f` inside a batch window on the update scheduler context: all
    /// recomputation triggered within `f` is coalesced into a single flush
    /// once `f` returns (or panics).
    pub fn batch(self: &Arc<Self>, f: impl FnOnce()) {
        self.update.batch(f);
    }
}
