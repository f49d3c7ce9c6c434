use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use anyhow::Result;
use serde_json::Value;

use crate::storage::now_ms;

/// Default dispatch target — the page itself.
pub const ROOT_TARGET: &str = "page";

const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// A structured event, as delivered to handlers and recorded in history.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub name: String,
    pub data: Value,
    pub timestamp_ms: u64,
}

type Handler = Rc<dyn Fn(&BusEvent) -> Result<()>>;

struct Registration {
    id: u64,
    target: String,
    once: bool,
    handler: Handler,
}

struct BusInner {
    listeners: HashMap<String, Vec<Registration>>,
    history: VecDeque<BusEvent>,
    capacity: usize,
    next_id: u64,
}

/// Namespaced publish/subscribe bus with bounded history.
///
/// Dispatch is synchronous and single-threaded: `emit` returns only after
/// every matching handler has run. Handler errors are logged and isolated —
/// one failing handler never prevents the others from running. History is a
/// fixed-capacity ring: once full, the oldest entry is evicted first.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a bus whose history holds at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                listeners: HashMap::new(),
                history: VecDeque::with_capacity(capacity),
                capacity,
                next_id: 0,
            })),
        }
    }

    /// Emit an event on the root target.
    pub fn emit(&self, name: &str, data: Value) -> BusEvent {
        self.emit_to(name, data, ROOT_TARGET)
    }

    /// Emit an event on a specific dispatch target.
    ///
    /// The event is recorded in history before dispatch, so handlers can
    /// already see it there. Handlers registered with `once` are removed
    /// before their handler runs, so a reentrant emit cannot fire them twice.
    pub fn emit_to(&self, name: &str, data: Value, target: &str) -> BusEvent {
        let event = BusEvent {
            name: name.to_string(),
            data,
            timestamp_ms: now_ms(),
        };

        let to_call: Vec<Handler> = {
            let mut inner = self.inner.borrow_mut();
            if inner.history.len() >= inner.capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());

            match inner.listeners.get_mut(name) {
                Some(regs) => {
                    let handlers = regs
                        .iter()
                        .filter(|r| r.target == target)
                        .map(|r| r.handler.clone())
                        .collect();
                    regs.retain(|r| !(r.once && r.target == target));
                    handlers
                }
                None => Vec::new(),
            }
        };

        for handler in to_call {
            if let Err(err) = handler(&event) {
                tracing::warn!(event = name, error = %err, "event handler failed");
            }
        }

        event
    }

    /// Register a handler for `name` on the root target.
    pub fn on(
        &self,
        name: &str,
        handler: impl Fn(&BusEvent) -> Result<()> + 'static,
    ) -> BusSubscription {
        self.register(name, ROOT_TARGET, false, Rc::new(handler))
    }

    /// Register a handler for `name` on a specific target.
    pub fn on_target(
        &self,
        name: &str,
        target: &str,
        handler: impl Fn(&BusEvent) -> Result<()> + 'static,
    ) -> BusSubscription {
        self.register(name, target, false, Rc::new(handler))
    }

    /// Register a handler that auto-deregisters after its first delivery.
    pub fn once(
        &self,
        name: &str,
        handler: impl Fn(&BusEvent) -> Result<()> + 'static,
    ) -> BusSubscription {
        self.register(name, ROOT_TARGET, true, Rc::new(handler))
    }

    fn register(&self, name: &str, target: &str, once: bool, handler: Handler) -> BusSubscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .listeners
            .entry(name.to_string())
            .or_default()
            .push(Registration {
                id,
                target: target.to_string(),
                once,
                handler,
            });
        BusSubscription {
            inner: Rc::downgrade(&self.inner),
            name: name.to_string(),
            id,
        }
    }

    /// Remove every handler registered for `name`, across all targets.
    pub fn off(&self, name: &str) {
        self.inner.borrow_mut().listeners.remove(name);
    }

    /// Most-recent-first view of the last `limit` events.
    pub fn history(&self, limit: usize) -> Vec<BusEvent> {
        self.inner
            .borrow()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most-recent-first view of the last `limit` events named `name`.
    pub fn history_for(&self, name: &str, limit: usize) -> Vec<BusEvent> {
        self.inner
            .borrow()
            .history
            .iter()
            .rev()
            .filter(|e| e.name == name)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of handlers currently registered for `name` across all targets.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Deregister every handler and clear history — full teardown for test
    /// isolation or page unload.
    pub fn destroy(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.listeners.clear();
        inner.history.clear();
    }

    /// A namespace-prefixed view over this bus.
    ///
    /// Event names are transparently prefixed with `"namespace:"`; registry
    /// and history are shared with the bus, so cross-channel introspection
    /// always works.
    pub fn channel(&self, namespace: &str) -> Channel {
        Channel {
            bus: self.clone(),
            prefix: format!("{namespace}:"),
        }
    }
}

/// Handle for deregistering a single bus handler.
pub struct BusSubscription {
    inner: Weak<RefCell<BusInner>>,
    name: String,
    id: u64,
}

impl BusSubscription {
    pub fn cancel(self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(regs) = inner.borrow_mut().listeners.get_mut(&self.name) {
                regs.retain(|r| r.id != self.id);
            }
        }
    }
}

/// Namespace-prefixed view returned by [`EventBus::channel`].
pub struct Channel {
    bus: EventBus,
    prefix: String,
}

impl Channel {
    fn scoped(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn emit(&self, name: &str, data: Value) -> BusEvent {
        self.bus.emit(&self.scoped(name), data)
    }

    pub fn on(
        &self,
        name: &str,
        handler: impl Fn(&BusEvent) -> Result<()> + 'static,
    ) -> BusSubscription {
        self.bus.on(&self.scoped(name), handler)
    }

    pub fn once(
        &self,
        name: &str,
        handler: impl Fn(&BusEvent) -> Result<()> + 'static,
    ) -> BusSubscription {
        self.bus.once(&self.scoped(name), handler)
    }

    pub fn off(&self, name: &str) {
        self.bus.off(&self.scoped(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn emit_delivers_to_registered_handler() {
        let bus = EventBus::new();
        let seen = Rc::new(Cell::new(0));
        let seen2 = seen.clone();
        let _sub = bus.on("menu:open", move |event| {
            assert_eq!(event.name, "menu:open");
            assert_eq!(event.data, json!({"source": "header"}));
            seen2.set(seen2.get() + 1);
            Ok(())
        });
        bus.emit("menu:open", json!({"source": "header"}));
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn history_never_exceeds_capacity_and_evicts_oldest_first() {
        let bus = EventBus::with_capacity(3);
        for i in 0..5 {
            bus.emit(&format!("e{i}"), Value::Null);
        }
        let history = bus.history(10);
        assert_eq!(history.len(), 3);
        // most-recent-first: e4, e3, e2 — e0 and e1 were evicted
        assert_eq!(history[0].name, "e4");
        assert_eq!(history[1].name, "e3");
        assert_eq!(history[2].name, "e2");
    }

    #[test]
    fn history_for_filters_by_name() {
        let bus = EventBus::new();
        bus.emit("a", json!(1));
        bus.emit("b", json!(2));
        bus.emit("a", json!(3));
        let history = bus.history_for("a", 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].data, json!(3));
        assert_eq!(history[1].data, json!(1));
        assert_eq!(bus.history_for("a", 1).len(), 1);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let _sub = bus.once("ready", move |_| {
            count2.set(count2.get() + 1);
            Ok(())
        });
        bus.emit("ready", Value::Null);
        bus.emit("ready", Value::Null);
        assert_eq!(count.get(), 1);
        assert_eq!(bus.listener_count("ready"), 0);
    }

    #[test]
    fn cancel_stops_further_deliveries() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let sub = bus.on("tick", move |_| {
            count2.set(count2.get() + 1);
            Ok(())
        });
        bus.emit("tick", Value::Null);
        sub.cancel();
        bus.emit("tick", Value::Null);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn off_removes_handlers_across_all_targets() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let (c1, c2) = (count.clone(), count.clone());
        let _a = bus.on("scroll", move |_| {
            c1.set(c1.get() + 1);
            Ok(())
        });
        let _b = bus.on_target("scroll", "sidebar", move |_| {
            c2.set(c2.get() + 1);
            Ok(())
        });
        bus.off("scroll");
        bus.emit("scroll", Value::Null);
        bus.emit_to("scroll", Value::Null, "sidebar");
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn target_scopes_delivery() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let _sub = bus.on_target("open", "drawer", move |_| {
            count2.set(count2.get() + 1);
            Ok(())
        });
        bus.emit("open", Value::Null); // root target, not delivered
        bus.emit_to("open", Value::Null, "drawer");
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_the_others() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let _bad = bus.on("save", |_| anyhow::bail!("handler exploded"));
        let _good = bus.on("save", move |_| {
            count2.set(count2.get() + 1);
            Ok(())
        });
        bus.emit("save", Value::Null);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn channel_prefixes_names_and_shares_history() {
        let bus = EventBus::new();
        let forms = bus.channel("forms");
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let _sub = forms.on("submitted", move |_| {
            count2.set(count2.get() + 1);
            Ok(())
        });
        forms.emit("submitted", json!({"form": "contact"}));
        assert_eq!(count.get(), 1);
        // visible from the bus under the prefixed name
        assert_eq!(bus.history_for("forms:submitted", 10).len(), 1);

        forms.off("submitted");
        forms.emit("submitted", Value::Null);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn destroy_clears_handlers_and_history() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        let _sub = bus.on("x", move |_| {
            count2.set(count2.get() + 1);
            Ok(())
        });
        bus.emit("x", Value::Null);
        bus.destroy();
        bus.emit("x", Value::Null);
        assert_eq!(count.get(), 1);
        // only the post-destroy emit is in history
        assert_eq!(bus.history(10).len(), 1);
    }
}
