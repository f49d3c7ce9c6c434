mod modules;

use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};

use sitekit_config::RuntimeConfig;
use sitekit_core::bus::EventBus;
use sitekit_core::events::{
    self, DarkModeChanged, LanguageChanged, ModuleLoadFailed, RouteChanged,
};
use sitekit_core::loader::{Interaction, LoadOutcome, ModuleLoader, Route};
use sitekit_core::logging;
use sitekit_core::module::ModuleId;
use sitekit_core::state::{StateKey, StateStore};
use sitekit_core::storage::{JsonFileStorage, KeyValueStorage};
use sitekit_mod_language::LanguageModule;
use sitekit_mod_theme::ThemeModule;

/// Fires when the snapshot interval has elapsed since the last flush.
struct SnapshotTimer {
    last: Instant,
    interval: Duration,
}

impl SnapshotTimer {
    fn new(interval: Duration) -> Self {
        Self {
            last: Instant::now(),
            interval,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// One page/tab's worth of runtime: the three primitives, constructed
/// explicitly and wired together here — nothing lives in module-scope
/// statics.
struct Session {
    config: RuntimeConfig,
    store: StateStore,
    bus: EventBus,
    loader: ModuleLoader,
}

impl Session {
    fn new(
        config: RuntimeConfig,
        storage: Rc<dyn KeyValueStorage>,
        prefers_dark: bool,
    ) -> Result<Self> {
        let store = StateStore::with_storage(storage, &config.storage_prefix);
        let bus = EventBus::with_capacity(config.history_capacity);
        let registry = modules::build_registry(&config, prefers_dark)?;
        let loader = ModuleLoader::new(Rc::new(registry), config.max_retries);

        let session = Self {
            config,
            store,
            bus,
            loader,
        };
        session.install_middleware();
        session.bridge_state_events();
        Ok(session)
    }

    fn install_middleware(&self) {
        // every string is normalized before it lands in the store
        self.store.add_middleware(|_, value, _| {
            Ok(match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other,
            })
        });
    }

    /// Re-publish the state changes other modules care about as bus events.
    fn bridge_state_events(&self) {
        let bus = self.bus.clone();
        let _ = self.store.subscribe(StateKey::DarkMode, move |new, _, _| {
            let payload = DarkModeChanged {
                enabled: new.as_bool().unwrap_or(false),
            };
            bus.emit(events::DARK_MODE_CHANGED, serde_json::to_value(payload)?);
            Ok(())
        });

        let bus = self.bus.clone();
        let _ = self.store.subscribe(StateKey::Language, move |new, old, _| {
            let payload = LanguageChanged {
                old: old.and_then(|v| v.as_str().map(str::to_string)),
                new: new.as_str().unwrap_or_default().to_string(),
            };
            bus.emit(events::LANGUAGE_CHANGED, serde_json::to_value(payload)?);
            Ok(())
        });
    }

    /// Surface load failures to the rest of the page as bus events.
    fn report_failures(&self, outcomes: &[LoadOutcome]) -> Result<()> {
        for outcome in outcomes {
            if let LoadOutcome::Failed(err) = outcome {
                let payload = ModuleLoadFailed {
                    module: err.module(),
                    reason: err.to_string(),
                };
                self.bus
                    .emit(events::MODULE_LOAD_FAILED, serde_json::to_value(payload)?);
            }
        }
        Ok(())
    }

    async fn navigate(&self, route: Route) -> Result<()> {
        let outcomes = self.loader.load_for_route(route).await;
        self.report_failures(&outcomes)?;
        self.store.set(StateKey::ActiveRoute, json!(route.as_str()))?;
        let payload = RouteChanged {
            route: route.as_str().to_string(),
        };
        self.bus
            .emit(events::ROUTE_CHANGED, serde_json::to_value(payload)?);
        Ok(())
    }

    /// A representative visit, end to end: restore, preload, land on the
    /// home page on a phone, interact, move to the contact form, flush.
    async fn run(&self) -> Result<()> {
        let restored = self.store.restore()?;
        tracing::info!(restored, "persisted state restored");
        if self.store.get(StateKey::Language).is_none() {
            self.store
                .set(StateKey::Language, json!(self.config.default_language))?;
        }

        let outcomes = self.loader.preload_critical().await;
        self.report_failures(&outcomes)?;

        let mut snapshots =
            SnapshotTimer::new(Duration::from_secs(self.config.snapshot_interval_secs));

        self.navigate(Route::Home).await?;
        self.store.set(StateKey::ViewportWidth, json!(390))?;
        let outcomes = self.loader.load_for_viewport(true).await;
        self.report_failures(&outcomes)?;

        let visits = self
            .store
            .get(StateKey::VisitCount)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        self.store.set(StateKey::VisitCount, json!(visits + 1))?;

        // resolve the effective theme now that the module is in
        if let Some(handle) = self.loader.get(ModuleId::DarkMode) {
            if let Some(theme) = handle.as_any().downcast_ref::<ThemeModule>() {
                let stored = self.store.get(StateKey::DarkMode).and_then(|v| v.as_bool());
                self.store
                    .set(StateKey::DarkMode, json!(theme.effective(stored)))?;
            }
        }

        if let Some(handle) = self.loader.get(ModuleId::Language) {
            if let Some(language) = handle.as_any().downcast_ref::<LanguageModule>() {
                let lang = self
                    .store
                    .get(StateKey::Language)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| self.config.default_language.clone());
                tracing::info!(
                    lang,
                    home = language.translate(&lang, "nav.home"),
                    "navigation labels resolved"
                );
            }
        }

        // first menu tap pulls in the drawer
        let outcomes = self.loader.load_on_interaction(Interaction::MenuToggle).await;
        self.report_failures(&outcomes)?;
        self.store.set(StateKey::DrawerOpen, json!(true))?;

        if snapshots.due(Instant::now()) {
            self.store.snapshot()?;
        }

        self.navigate(Route::Contact).await?;
        self.store.set(StateKey::DrawerOpen, json!(false))?;

        tracing::info!(
            recent_events = self.bus.history(10).len(),
            pending_loads = self.loader.pending_count(),
            "session complete"
        );

        // teardown: final flush, then full bus teardown
        self.store.snapshot()?;
        self.bus.destroy();
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _overlay = logging::init();
    tracing::info!("sitekit starting");

    let config = RuntimeConfig::load_or_default(Path::new("sitekit.toml"))?;
    let storage: Rc<dyn KeyValueStorage> = Rc::new(JsonFileStorage::open("sitekit-state.json")?);
    let session = Session::new(config, storage, false)?;
    session.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitekit_core::storage::MemoryStorage;

    fn test_session() -> Session {
        Session::new(RuntimeConfig::default(), Rc::new(MemoryStorage::new()), false).unwrap()
    }

    #[test]
    fn snapshot_timer_fires_only_after_the_interval() {
        let mut timer = SnapshotTimer::new(Duration::from_secs(30));
        let start = timer.last;
        assert!(!timer.due(start + Duration::from_secs(29)));
        assert!(timer.due(start + Duration::from_secs(30)));
        // the clock was reset by the previous fire
        assert!(!timer.due(start + Duration::from_secs(31)));
    }

    #[tokio::test]
    async fn navigate_records_route_state_and_event() {
        let session = test_session();
        session.navigate(Route::Contact).await.unwrap();
        assert_eq!(
            session.store.get(StateKey::ActiveRoute),
            Some(json!("contact"))
        );
        let history = session.bus.history_for(events::ROUTE_CHANGED, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].data["route"], json!("contact"));
        assert!(session.loader.is_loaded(ModuleId::Forms));
    }

    #[tokio::test]
    async fn dark_mode_change_is_bridged_onto_the_bus() {
        let session = test_session();
        session.store.set(StateKey::DarkMode, json!(true)).unwrap();
        let history = session.bus.history_for(events::DARK_MODE_CHANGED, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].data["enabled"], json!(true));
    }

    #[tokio::test]
    async fn language_change_carries_old_and_new_codes() {
        let session = test_session();
        session.store.set(StateKey::Language, json!("fr")).unwrap();
        session.store.set(StateKey::Language, json!("en")).unwrap();
        let history = session.bus.history_for(events::LANGUAGE_CHANGED, 10);
        assert_eq!(history.len(), 2);
        // most-recent-first
        assert_eq!(history[0].data["old"], json!("fr"));
        assert_eq!(history[0].data["new"], json!("en"));
        assert_eq!(history[1].data["old"], Value::Null);
    }

    #[tokio::test]
    async fn full_session_runs_and_flushes_a_snapshot() {
        let storage = Rc::new(MemoryStorage::new());
        let session = Session::new(RuntimeConfig::default(), storage.clone(), true).unwrap();
        session.run().await.unwrap();

        // a fresh store restores the flushed snapshot
        let fresh = StateStore::with_storage(storage, "sitekit.");
        assert!(fresh.restore().unwrap());
        assert_eq!(fresh.get(StateKey::VisitCount), Some(json!(1)));
        assert_eq!(fresh.get(StateKey::ActiveRoute), Some(json!("contact")));
        // prefers_dark=true resolved into the store and persisted
        assert_eq!(fresh.get(StateKey::DarkMode), Some(json!(true)));
    }
}
