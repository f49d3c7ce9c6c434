use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{self, KeyValueStorage};

/// A named field in the store.
///
/// The set is closed: every piece of shared UI state has a variant here,
/// so a typo'd field name is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateKey {
    DarkMode,
    Language,
    DrawerOpen,
    CookieConsent,
    ActiveRoute,
    ViewportWidth,
    FormErrors,
    CarouselIndex,
    VisitCount,
}

impl StateKey {
    pub const ALL: [StateKey; 9] = [
        StateKey::DarkMode,
        StateKey::Language,
        StateKey::DrawerOpen,
        StateKey::CookieConsent,
        StateKey::ActiveRoute,
        StateKey::ViewportWidth,
        StateKey::FormErrors,
        StateKey::CarouselIndex,
        StateKey::VisitCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::DarkMode => "dark-mode",
            StateKey::Language => "language",
            StateKey::DrawerOpen => "drawer-open",
            StateKey::CookieConsent => "cookie-consent",
            StateKey::ActiveRoute => "active-route",
            StateKey::ViewportWidth => "viewport-width",
            StateKey::FormErrors => "form-errors",
            StateKey::CarouselIndex => "carousel-index",
            StateKey::VisitCount => "visit-count",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys written through to persistent storage on every change, independent
/// of whether the change notifies subscribers.
pub const PERSISTED_KEYS: &[StateKey] = &[
    StateKey::DarkMode,
    StateKey::Language,
    StateKey::CookieConsent,
];

/// Storage key (after the configured prefix) of the aggregate snapshot.
pub const SNAPSHOT_KEY: &str = "state.snapshot";

/// Bumped whenever the snapshot shape changes; a mismatched stored snapshot
/// is discarded on restore.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Callback invoked on a field change: `(new_value, old_value, key)`.
pub type SubscriberFn = Rc<dyn Fn(&Value, Option<&Value>, StateKey) -> Result<()>>;

/// Transform applied to every candidate value before it is stored:
/// `(key, candidate, current_stored_value)`.
pub type MiddlewareFn = Rc<dyn Fn(StateKey, Value, Option<&Value>) -> Result<Value>>;

struct StoreInner {
    values: HashMap<StateKey, Value>,
    subscribers: HashMap<StateKey, Vec<(u64, SubscriberFn)>>,
    middleware: Vec<MiddlewareFn>,
    next_sub_id: u64,
}

/// Reactive key/value store with a global middleware chain and per-key
/// subscriptions.
///
/// A stored value always reflects the output of the full middleware chain.
/// Subscribers fire only when the post-middleware value differs from the
/// prior value under structural (`serde_json::Value`) equality. Middleware
/// failures abort the write and leave the store untouched; subscriber
/// failures are logged and isolated.
///
/// The store is single-threaded. Reentrancy is permitted — a subscriber may
/// call back into the store, including for the same key — but there is no
/// recursion-depth guard; avoiding cycles is the caller's responsibility.
#[derive(Clone)]
pub struct StateStore {
    inner: Rc<RefCell<StoreInner>>,
    storage: Option<Rc<dyn KeyValueStorage>>,
    prefix: Rc<str>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// A store with no persistence.
    pub fn new() -> Self {
        Self::build(None, "")
    }

    /// A store persisting allowlisted keys and snapshots to `storage`, under
    /// keys beginning with `prefix`.
    pub fn with_storage(storage: Rc<dyn KeyValueStorage>, prefix: &str) -> Self {
        Self::build(Some(storage), prefix)
    }

    fn build(storage: Option<Rc<dyn KeyValueStorage>>, prefix: &str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                values: HashMap::new(),
                subscribers: HashMap::new(),
                middleware: Vec::new(),
                next_sub_id: 0,
            })),
            storage,
            prefix: Rc::from(prefix),
        }
    }

    /// Set a single field, notifying its subscribers if the stored value
    /// changed. Returns whether it changed.
    pub fn set(&self, key: StateKey, value: Value) -> Result<bool> {
        Ok(!self.apply(&[(key, value)], true)?.is_empty())
    }

    /// Set a single field without notifying subscribers. Allowlisted keys
    /// are still written through to storage.
    pub fn set_silent(&self, key: StateKey, value: Value) -> Result<bool> {
        Ok(!self.apply(&[(key, value)], false)?.is_empty())
    }

    /// Set several fields at once: all mutations (and allowlist persists)
    /// are applied before any subscriber is notified, then notifications run
    /// in the order the pairs were supplied. Returns the keys that changed.
    ///
    /// A subscriber invoked for one key can already observe the other keys'
    /// new values — cross-key notification is not atomic from a subscriber's
    /// point of view.
    pub fn set_many(&self, updates: &[(StateKey, Value)]) -> Result<Vec<StateKey>> {
        self.apply(updates, true)
    }

    /// [`set_many`](Self::set_many) without subscriber notification.
    pub fn set_many_silent(&self, updates: &[(StateKey, Value)]) -> Result<Vec<StateKey>> {
        self.apply(updates, false)
    }

    fn apply(&self, updates: &[(StateKey, Value)], notify: bool) -> Result<Vec<StateKey>> {
        let chain: Vec<MiddlewareFn> = self.inner.borrow().middleware.clone();

        // Stage against a working view so a middleware failure leaves the
        // store untouched (no partial application).
        let mut view = self.inner.borrow().values.clone();
        let mut staged: Vec<(StateKey, Value, Option<Value>)> = Vec::new();
        for (key, value) in updates {
            let old = view.get(key).cloned();
            let mut candidate = value.clone();
            for mw in &chain {
                candidate = mw(*key, candidate, old.as_ref())?;
            }
            if old.as_ref() == Some(&candidate) {
                continue;
            }
            view.insert(*key, candidate.clone());
            staged.push((*key, candidate, old));
        }

        {
            let mut inner = self.inner.borrow_mut();
            for (key, new, _) in &staged {
                inner.values.insert(*key, new.clone());
            }
        }

        for (key, new, _) in &staged {
            if PERSISTED_KEYS.contains(key) {
                self.persist_field(*key, new);
            }
        }

        if notify {
            for (key, new, old) in &staged {
                self.notify(*key, new, old.as_ref());
            }
        }

        Ok(staged.into_iter().map(|(key, _, _)| key).collect())
    }

    fn notify(&self, key: StateKey, new: &Value, old: Option<&Value>) {
        // Clone the subscriber list so no store borrow is held while
        // callbacks run; reentrant calls see a consistent store.
        let subscribers: Vec<SubscriberFn> = self
            .inner
            .borrow()
            .subscribers
            .get(&key)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for cb in subscribers {
            if let Err(err) = cb(new, old, key) {
                tracing::error!(key = %key, error = %err, "state subscriber failed");
            }
        }
    }

    /// Current value of a field, if set.
    pub fn get(&self, key: StateKey) -> Option<Value> {
        self.inner.borrow().values.get(&key).cloned()
    }

    /// Shallow copy of every set field — not a live view.
    pub fn all(&self) -> HashMap<StateKey, Value> {
        self.inner.borrow().values.clone()
    }

    /// Register a callback for changes to `key`. Multiple callbacks may be
    /// registered per key; their relative notification order is unspecified.
    pub fn subscribe(
        &self,
        key: StateKey,
        callback: impl Fn(&Value, Option<&Value>, StateKey) -> Result<()> + 'static,
    ) -> Subscription {
        self.subscribe_rc(&[key], Rc::new(callback))
    }

    /// Register one callback for changes to several keys; the returned
    /// subscription cancels all of them at once.
    pub fn subscribe_many(
        &self,
        keys: &[StateKey],
        callback: impl Fn(&Value, Option<&Value>, StateKey) -> Result<()> + 'static,
    ) -> Subscription {
        self.subscribe_rc(keys, Rc::new(callback))
    }

    fn subscribe_rc(&self, keys: &[StateKey], callback: SubscriberFn) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let mut entries = Vec::with_capacity(keys.len());
        for &key in keys {
            let id = inner.next_sub_id;
            inner.next_sub_id += 1;
            inner
                .subscribers
                .entry(key)
                .or_default()
                .push((id, callback.clone()));
            entries.push((key, id));
        }
        Subscription {
            inner: Rc::downgrade(&self.inner),
            entries,
        }
    }

    /// Append a transform to the global middleware chain. Affects all
    /// subsequent writes to all keys, composed in registration order.
    pub fn add_middleware(
        &self,
        middleware: impl Fn(StateKey, Value, Option<&Value>) -> Result<Value> + 'static,
    ) {
        self.inner.borrow_mut().middleware.push(Rc::new(middleware));
    }

    fn persist_field(&self, key: StateKey, value: &Value) {
        let Some(storage) = &self.storage else {
            return;
        };
        let storage_key = format!("{}{}", self.prefix, key.as_str());
        if let Err(err) = storage::write_entry(storage.as_ref(), &storage_key, value.clone(), None)
        {
            tracing::warn!(key = %key, error = %err, "failed to persist state field");
        }
    }

    /// Write the aggregate snapshot of every set field under the well-known
    /// snapshot key. No-op without storage.
    pub fn snapshot(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let data = serde_json::to_value(self.all())?;
        storage::write_versioned(
            storage.as_ref(),
            &format!("{}{}", self.prefix, SNAPSHOT_KEY),
            SNAPSHOT_VERSION,
            data,
        )
    }

    /// Re-apply the latest snapshot through [`set_many`](Self::set_many).
    ///
    /// A missing or version-mismatched snapshot restores nothing; fields the
    /// snapshot does not know are left alone. Returns whether a snapshot was
    /// applied.
    pub fn restore(&self) -> Result<bool> {
        let Some(storage) = &self.storage else {
            return Ok(false);
        };
        let key = format!("{}{}", self.prefix, SNAPSHOT_KEY);
        let Some(data) = storage::read_versioned(storage.as_ref(), &key, SNAPSHOT_VERSION) else {
            return Ok(false);
        };
        let raw: HashMap<String, Value> = serde_json::from_value(data)?;
        let updates: Vec<(StateKey, Value)> = StateKey::ALL
            .iter()
            .filter_map(|key| raw.get(key.as_str()).map(|value| (*key, value.clone())))
            .collect();
        self.set_many(&updates)?;
        Ok(true)
    }
}

/// Handle for deregistering state subscriptions.
pub struct Subscription {
    inner: Weak<RefCell<StoreInner>>,
    entries: Vec<(StateKey, u64)>,
}

impl Subscription {
    pub fn cancel(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        for (key, id) in self.entries {
            if let Some(subs) = inner.subscribers.get_mut(&key) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::{Cell, RefCell as StdRefCell};

    fn counting_subscriber(count: Rc<Cell<u32>>) -> impl Fn(&Value, Option<&Value>, StateKey) -> Result<()> {
        move |_, _, _| {
            count.set(count.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn set_stores_and_notifies() {
        let store = StateStore::new();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = store.subscribe(StateKey::Language, move |new, old, key| {
            seen2.borrow_mut().push((new.clone(), old.cloned(), key));
            Ok(())
        });

        assert!(store.set(StateKey::Language, json!("fr")).unwrap());
        assert_eq!(store.get(StateKey::Language), Some(json!("fr")));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (json!("fr"), None, StateKey::Language));
    }

    #[test]
    fn identical_value_notifies_at_most_once() {
        let store = StateStore::new();
        let count = Rc::new(Cell::new(0));
        let _sub = store.subscribe(StateKey::DarkMode, counting_subscriber(count.clone()));

        assert!(store.set(StateKey::DarkMode, json!(true)).unwrap());
        assert!(!store.set(StateKey::DarkMode, json!(true)).unwrap());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn structural_equality_covers_containers() {
        let store = StateStore::new();
        let count = Rc::new(Cell::new(0));
        let _sub = store.subscribe(StateKey::FormErrors, counting_subscriber(count.clone()));

        store
            .set(StateKey::FormErrors, json!({"contact": ["email"]}))
            .unwrap();
        // structurally identical object, different allocation
        store
            .set(StateKey::FormErrors, json!({"contact": ["email"]}))
            .unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn set_silent_skips_notification() {
        let store = StateStore::new();
        let count = Rc::new(Cell::new(0));
        let _sub = store.subscribe(StateKey::DrawerOpen, counting_subscriber(count.clone()));

        assert!(store.set_silent(StateKey::DrawerOpen, json!(true)).unwrap());
        assert_eq!(count.get(), 0);
        assert_eq!(store.get(StateKey::DrawerOpen), Some(json!(true)));
    }

    #[test]
    fn cancel_stops_notifications_but_keeps_other_subscribers() {
        let store = StateStore::new();
        let a = Rc::new(Cell::new(0));
        let b = Rc::new(Cell::new(0));
        let sub_a = store.subscribe(StateKey::VisitCount, counting_subscriber(a.clone()));
        let _sub_b = store.subscribe(StateKey::VisitCount, counting_subscriber(b.clone()));

        store.set(StateKey::VisitCount, json!(1)).unwrap();
        sub_a.cancel();
        store.set(StateKey::VisitCount, json!(2)).unwrap();

        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn subscribe_many_covers_each_key_and_cancels_together() {
        let store = StateStore::new();
        let count = Rc::new(Cell::new(0));
        let sub = store.subscribe_many(
            &[StateKey::DarkMode, StateKey::Language],
            counting_subscriber(count.clone()),
        );

        store.set(StateKey::DarkMode, json!(true)).unwrap();
        store.set(StateKey::Language, json!("en")).unwrap();
        assert_eq!(count.get(), 2);

        sub.cancel();
        store.set(StateKey::DarkMode, json!(false)).unwrap();
        store.set(StateKey::Language, json!("ru")).unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn set_many_mutates_everything_before_notifying() {
        let store = StateStore::new();
        let observed_b = Rc::new(StdRefCell::new(None));
        let observed_b2 = observed_b.clone();
        let store2 = store.clone();
        let _sub = store.subscribe(StateKey::DarkMode, move |_, _, _| {
            *observed_b2.borrow_mut() = store2.get(StateKey::Language);
            Ok(())
        });

        let changed = store
            .set_many(&[
                (StateKey::DarkMode, json!(true)),
                (StateKey::Language, json!("en")),
            ])
            .unwrap();

        assert_eq!(changed, vec![StateKey::DarkMode, StateKey::Language]);
        // the dark-mode subscriber already sees the language mutation
        assert_eq!(*observed_b.borrow(), Some(json!("en")));
    }

    #[test]
    fn set_many_notifies_each_changed_key_exactly_once() {
        let store = StateStore::new();
        let count = Rc::new(Cell::new(0));
        let _sub = store.subscribe_many(
            &[StateKey::DarkMode, StateKey::Language],
            counting_subscriber(count.clone()),
        );

        store
            .set_many(&[
                (StateKey::DarkMode, json!(true)),
                (StateKey::Language, json!("en")),
            ])
            .unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn middleware_transforms_before_store() {
        let store = StateStore::new();
        store.add_middleware(|_, value, _| {
            Ok(match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other,
            })
        });

        store.set(StateKey::Language, json!("  fr  ")).unwrap();
        assert_eq!(store.get(StateKey::Language), Some(json!("fr")));
    }

    #[test]
    fn middleware_composes_in_registration_order() {
        let store = StateStore::new();
        store.add_middleware(|_, value, _| {
            Ok(json!(format!("{}a", value.as_str().unwrap_or_default())))
        });
        store.add_middleware(|_, value, _| {
            Ok(json!(format!("{}b", value.as_str().unwrap_or_default())))
        });

        store.set(StateKey::ActiveRoute, json!("x")).unwrap();
        assert_eq!(store.get(StateKey::ActiveRoute), Some(json!("xab")));
    }

    #[test]
    fn middleware_failure_aborts_the_whole_write() {
        let store = StateStore::new();
        store.set(StateKey::VisitCount, json!(1)).unwrap();
        store.add_middleware(|key, value, _| {
            if key == StateKey::VisitCount && !value.is_number() {
                anyhow::bail!("visit count must be a number");
            }
            Ok(value)
        });

        let err = store
            .set_many(&[
                (StateKey::DarkMode, json!(true)),
                (StateKey::VisitCount, json!("nope")),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
        // no partial application: the earlier pair was not written either
        assert_eq!(store.get(StateKey::DarkMode), None);
        assert_eq!(store.get(StateKey::VisitCount), Some(json!(1)));
    }

    #[test]
    fn failing_subscriber_is_isolated() {
        let store = StateStore::new();
        let count = Rc::new(Cell::new(0));
        let _bad = store.subscribe(StateKey::DarkMode, |_, _, _| {
            anyhow::bail!("subscriber exploded")
        });
        let _good = store.subscribe(StateKey::DarkMode, counting_subscriber(count.clone()));

        store.set(StateKey::DarkMode, json!(true)).unwrap();
        assert_eq!(count.get(), 1);

        // the failing subscriber was not deregistered
        store.set(StateKey::DarkMode, json!(false)).unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn reentrant_set_from_subscriber_is_permitted() {
        let store = StateStore::new();
        let store2 = store.clone();
        let _sub = store.subscribe(StateKey::DrawerOpen, move |new, _, _| {
            if new == &json!(true) {
                store2.set(StateKey::CarouselIndex, json!(0))?;
            }
            Ok(())
        });

        store.set(StateKey::DrawerOpen, json!(true)).unwrap();
        assert_eq!(store.get(StateKey::CarouselIndex), Some(json!(0)));
    }

    #[test]
    fn allowlisted_keys_persist_immediately_even_when_silent() {
        let storage = Rc::new(crate::storage::MemoryStorage::new());
        let store = StateStore::with_storage(storage.clone(), "site.");

        store.set_silent(StateKey::DarkMode, json!(true)).unwrap();
        assert_eq!(
            storage::read_entry(storage.as_ref(), "site.dark-mode"),
            Some(json!(true))
        );

        // non-allowlisted key is not written through
        store.set(StateKey::DrawerOpen, json!(true)).unwrap();
        assert_eq!(storage::read_entry(storage.as_ref(), "site.drawer-open"), None);
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let storage = Rc::new(crate::storage::MemoryStorage::new());
        let store = StateStore::with_storage(storage.clone(), "site.");
        store.set(StateKey::Language, json!("ru")).unwrap();
        store.set(StateKey::VisitCount, json!(7)).unwrap();
        store.snapshot().unwrap();

        let fresh = StateStore::with_storage(storage, "site.");
        let count = Rc::new(Cell::new(0));
        let _sub = fresh.subscribe(StateKey::Language, counting_subscriber(count.clone()));

        assert!(fresh.restore().unwrap());
        assert_eq!(fresh.get(StateKey::Language), Some(json!("ru")));
        assert_eq!(fresh.get(StateKey::VisitCount), Some(json!(7)));
        // restoration goes through set_many, so subscribers fire
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn restore_without_snapshot_is_a_noop() {
        let storage = Rc::new(crate::storage::MemoryStorage::new());
        let store = StateStore::with_storage(storage, "site.");
        assert!(!store.restore().unwrap());
        assert!(store.all().is_empty());
    }
}
