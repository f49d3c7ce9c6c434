use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use futures::future::{join_all, LocalBoxFuture, Shared};
use futures::FutureExt;

use crate::error::LoadError;
use crate::module::{ModuleHandle, ModuleId};
use crate::registry::ModuleRegistry;

/// Default ceiling on failed load attempts per module.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Modules fetched eagerly at startup, before any route-specific loads.
pub const CRITICAL_MODULES: &[ModuleId] = &[
    ModuleId::Navigation,
    ModuleId::DarkMode,
    ModuleId::Language,
    ModuleId::Cookies,
];

/// A page of the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Cabinet,
    Expertises,
    Honoraires,
    Contact,
    Blog,
    Consultation,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Home => "home",
            Route::Cabinet => "cabinet",
            Route::Expertises => "expertises",
            Route::Honoraires => "honoraires",
            Route::Contact => "contact",
            Route::Blog => "blog",
            Route::Consultation => "consultation",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user interaction that triggers deferred module loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interaction {
    MenuToggle,
    FormFocus,
    CarouselTouch,
}

/// Modules a route needs beyond the critical set.
pub fn modules_for_route(route: Route) -> &'static [ModuleId] {
    match route {
        Route::Home => &[ModuleId::Carousel, ModuleId::Animations, ModuleId::HomePage],
        Route::Cabinet => &[ModuleId::Animations],
        Route::Expertises => &[ModuleId::ExpertisesPage, ModuleId::Animations],
        Route::Honoraires => &[],
        Route::Contact => &[ModuleId::Forms, ModuleId::ContactPage],
        Route::Blog => &[ModuleId::Blog],
        Route::Consultation => &[ModuleId::Forms],
    }
}

/// Modules loaded for the current viewport class.
pub fn modules_for_viewport(mobile: bool) -> &'static [ModuleId] {
    if mobile {
        &[ModuleId::Drawer]
    } else {
        &[ModuleId::Animations]
    }
}

/// Modules loaded the first time an interaction occurs.
pub fn modules_for_interaction(trigger: Interaction) -> &'static [ModuleId] {
    match trigger {
        Interaction::MenuToggle => &[ModuleId::Drawer],
        Interaction::FormFocus => &[ModuleId::Forms],
        Interaction::CarouselTouch => &[ModuleId::Carousel],
    }
}

/// Result of a load request. Never an error to the caller: failures are
/// recorded in the loader's bookkeeping and reported here as a value.
#[derive(Clone)]
pub enum LoadOutcome {
    Loaded(ModuleHandle),
    Skipped(SkipReason),
    Failed(LoadError),
}

impl LoadOutcome {
    pub fn handle(&self) -> Option<&ModuleHandle> {
        match self {
            LoadOutcome::Loaded(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }
}

impl fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded(handle) => write!(f, "Loaded({})", handle.id()),
            LoadOutcome::Skipped(reason) => write!(f, "Skipped({reason:?})"),
            LoadOutcome::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

/// Why a load request was skipped without touching the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ConditionFalse,
    RetryBudgetExhausted,
}

/// Host primitive answering "when does this element become visible?".
///
/// The returned future resolves at most once, on the element's first
/// transition to visible; the observer detaches itself afterwards.
pub trait VisibilityObserver {
    fn wait_visible(&self, element: &str) -> LocalBoxFuture<'static, ()>;
}

type SharedLoad = Shared<LocalBoxFuture<'static, LoadOutcome>>;

struct LoaderInner {
    loaded: HashMap<ModuleId, ModuleHandle>,
    pending: HashMap<ModuleId, SharedLoad>,
    failed: HashSet<ModuleId>,
    attempts: HashMap<ModuleId, u32>,
}

/// On-demand module loader with a permanent cache, in-flight deduplication,
/// and a bounded retry budget.
///
/// A module is in at most one of `loaded`/`pending` at any time. Concurrent
/// `load` calls for the same module share one in-flight future, so exactly
/// one fetch occurs. There is no timeout or cancellation: a loader future
/// that never resolves occupies its module's pending slot for the life of
/// the page.
#[derive(Clone)]
pub struct ModuleLoader {
    registry: Rc<ModuleRegistry>,
    observer: Option<Rc<dyn VisibilityObserver>>,
    max_retries: u32,
    inner: Rc<RefCell<LoaderInner>>,
}

impl ModuleLoader {
    pub fn new(registry: Rc<ModuleRegistry>, max_retries: u32) -> Self {
        Self {
            registry,
            observer: None,
            max_retries,
            inner: Rc::new(RefCell::new(LoaderInner {
                loaded: HashMap::new(),
                pending: HashMap::new(),
                failed: HashSet::new(),
                attempts: HashMap::new(),
            })),
        }
    }

    /// Attach the host's visibility observer. Without one,
    /// [`load_on_visible`](Self::load_on_visible) loads immediately.
    pub fn with_observer(mut self, observer: Rc<dyn VisibilityObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Load a module unconditionally.
    pub fn load(&self, id: ModuleId) -> LocalBoxFuture<'static, LoadOutcome> {
        self.load_if(id, || true)
    }

    /// Load a module if `condition` holds.
    ///
    /// Checks run in order: cache hit, in-flight deduplication, condition,
    /// retry-budget exhaustion, then a fresh fetch. A false condition and an
    /// exhausted budget record no state change.
    pub fn load_if(
        &self,
        id: ModuleId,
        condition: impl FnOnce() -> bool,
    ) -> LocalBoxFuture<'static, LoadOutcome> {
        {
            let inner = self.inner.borrow();
            if let Some(handle) = inner.loaded.get(&id) {
                let outcome = LoadOutcome::Loaded(handle.clone());
                return async move { outcome }.boxed_local();
            }
            if let Some(in_flight) = inner.pending.get(&id) {
                return in_flight.clone().boxed_local();
            }
        }

        if !condition() {
            return ready(LoadOutcome::Skipped(SkipReason::ConditionFalse));
        }

        {
            let inner = self.inner.borrow();
            if inner.failed.contains(&id)
                && inner.attempts.get(&id).copied().unwrap_or(0) >= self.max_retries
            {
                tracing::debug!(module = %id, "skipping load: retry budget exhausted");
                return ready(LoadOutcome::Skipped(SkipReason::RetryBudgetExhausted));
            }
        }

        self.begin(id)
    }

    fn begin(&self, id: ModuleId) -> LocalBoxFuture<'static, LoadOutcome> {
        let in_flight: SharedLoad = drive(self.clone(), id).boxed_local().shared();
        self.inner.borrow_mut().pending.insert(id, in_flight.clone());
        in_flight.boxed_local()
    }

    /// Re-attempt a failed module.
    ///
    /// Clears only the failed flag — the attempt count survives, so a module
    /// that exhausts its budget stays unloadable until the page restarts.
    /// For a module that is not failed this behaves exactly like
    /// [`load`](Self::load).
    pub fn retry(&self, id: ModuleId) -> LocalBoxFuture<'static, LoadOutcome> {
        if !self.inner.borrow().failed.contains(&id) {
            return self.load(id);
        }
        let attempts = self.attempts(id);
        if attempts >= self.max_retries {
            tracing::warn!(module = %id, attempts, "retry refused: budget exhausted");
            return ready(LoadOutcome::Skipped(SkipReason::RetryBudgetExhausted));
        }
        self.inner.borrow_mut().failed.remove(&id);
        self.begin(id)
    }

    /// Fetch the critical-module set in parallel. The batch completes once
    /// every member settles; individual failures surface as `Failed`
    /// outcomes without aborting the rest.
    pub async fn preload_critical(&self) -> Vec<LoadOutcome> {
        self.load_batch(CRITICAL_MODULES).await
    }

    /// Load the modules a route needs, in parallel.
    pub async fn load_for_route(&self, route: Route) -> Vec<LoadOutcome> {
        self.load_batch(modules_for_route(route)).await
    }

    /// Load the modules for the current viewport class, in parallel.
    pub async fn load_for_viewport(&self, mobile: bool) -> Vec<LoadOutcome> {
        self.load_batch(modules_for_viewport(mobile)).await
    }

    /// Load the modules behind an interaction trigger, in parallel.
    pub async fn load_on_interaction(&self, trigger: Interaction) -> Vec<LoadOutcome> {
        self.load_batch(modules_for_interaction(trigger)).await
    }

    /// Load `ids` once `element` first becomes visible, or immediately when
    /// the host provides no visibility observer.
    pub async fn load_on_visible(&self, element: &str, ids: &[ModuleId]) -> Vec<LoadOutcome> {
        if let Some(observer) = &self.observer {
            observer.wait_visible(element).await;
        } else {
            tracing::debug!(element, "no visibility observer; loading immediately");
        }
        self.load_batch(ids).await
    }

    async fn load_batch(&self, ids: &[ModuleId]) -> Vec<LoadOutcome> {
        join_all(ids.iter().map(|id| self.load(*id))).await
    }

    /// Cached contents of an already-loaded module.
    pub fn get(&self, id: ModuleId) -> Option<ModuleHandle> {
        self.inner.borrow().loaded.get(&id).cloned()
    }

    pub fn is_loaded(&self, id: ModuleId) -> bool {
        self.inner.borrow().loaded.contains_key(&id)
    }

    pub fn is_failed(&self, id: ModuleId) -> bool {
        self.inner.borrow().failed.contains(&id)
    }

    /// Failed attempts recorded for a module. Cleared on success, never by a
    /// bare retry.
    pub fn attempts(&self, id: ModuleId) -> u32 {
        self.inner.borrow().attempts.get(&id).copied().unwrap_or(0)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending.len()
    }
}

async fn drive(loader: ModuleLoader, id: ModuleId) -> LoadOutcome {
    let result = match loader.registry.loader(id) {
        Some(fetch) => fetch().await,
        None => Err(LoadError::Unregistered(id).into()),
    };

    let mut inner = loader.inner.borrow_mut();
    inner.pending.remove(&id);
    match result {
        Ok(handle) => {
            inner.loaded.insert(id, handle.clone());
            inner.failed.remove(&id);
            inner.attempts.remove(&id);
            tracing::info!(module = %id, "module loaded");
            LoadOutcome::Loaded(handle)
        }
        Err(err) => {
            let attempt = inner.attempts.entry(id).or_insert(0);
            *attempt += 1;
            let attempt = *attempt;
            inner.failed.insert(id);
            tracing::warn!(module = %id, attempt, error = %err, "module load failed");
            LoadOutcome::Failed(LoadError::LoaderFailed {
                module: id,
                attempt,
                message: err.to_string(),
            })
        }
    }
}

fn ready(outcome: LoadOutcome) -> LocalBoxFuture<'static, LoadOutcome> {
    async move { outcome }.boxed_local()
}
