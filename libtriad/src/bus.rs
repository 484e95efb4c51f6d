//! Per-instance publish/subscribe bus
//!
//! Each component owns one bus mapping an event type to its subscriptions.
//! Subscriptions fire in insertion order and are identified by a [`Token`]
//! that is unique for the lifetime of the bus.
//!
//! # Dispatch semantics
//!
//! [`EventBus::notify`] takes a snapshot of the subscription list when it
//! starts. Consequently:
//!
//! - a subscription added while a dispatch is running does not fire in that
//!   dispatch (it fires from the next `notify` on);
//! - a subscription removed while a dispatch is running is skipped if its
//!   turn has not come yet;
//! - listeners may call `bind`, `unbind` and `notify` on the same bus.
//!
//! A panicking listener aborts the remaining dispatch; the bus does not
//! isolate listeners from each other.
//!
//! # Example
//!
//! ```
//! use libtriad::bus::{listener, EventBus, Unbind};
//!
//! let bus: EventBus<String> = EventBus::new();
//! let token = bus.bind("greet", listener(|name: &String| println!("hello {name}")));
//!
//! assert_eq!(bus.notify("greet", &"world".to_string()), 1);
//! assert_eq!(bus.unbind(Unbind::Token(token)), 1);
//! assert_eq!(bus.notify("greet", &"nobody".to_string()), 0);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

/// Shared listener handle; identity is the allocation (`Rc::ptr_eq`)
pub type Listener<P> = Rc<dyn Fn(&P)>;

/// Wrap a closure into a [`Listener`]
pub fn listener<P>(f: impl Fn(&P) + 'static) -> Listener<P> {
    Rc::new(f)
}

/// Subscription handle returned by [`EventBus::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which subscriptions [`EventBus::unbind`] removes
pub enum Unbind<'a, P> {
    /// Every subscription of every type
    All,
    /// The whole list for one event type
    Type(&'a str),
    /// The subscription holding this token, whatever its type
    Token(Token),
    /// Every subscription using this listener, across all types
    Listener(&'a Listener<P>),
    /// Subscriptions of one type using this listener
    TypeListener(&'a str, &'a Listener<P>),
}

impl<P> fmt::Debug for Unbind<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unbind::All => write!(f, "All"),
            Unbind::Type(event_type) => write!(f, "Type({event_type})"),
            Unbind::Token(token) => write!(f, "Token({token})"),
            Unbind::Listener(_) => write!(f, "Listener(..)"),
            Unbind::TypeListener(event_type, _) => write!(f, "TypeListener({event_type}, ..)"),
        }
    }
}

struct Subscription<P> {
    token: Token,
    listener: Listener<P>,
    live: Cell<bool>,
}

impl<P> Subscription<P> {
    fn uses(&self, listener: &Listener<P>) -> bool {
        Rc::ptr_eq(&self.listener, listener)
    }
}

/// Event-type keyed subscription lists plus the token counter
pub struct EventBus<P> {
    collection: RefCell<HashMap<String, Vec<Rc<Subscription<P>>>>>,
    last_token: Cell<u64>,
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventBus<P> {
    pub fn new() -> Self {
        Self {
            collection: RefCell::new(HashMap::new()),
            last_token: Cell::new(0),
        }
    }

    /// Append a subscription for `event_type`
    pub fn bind(&self, event_type: &str, listener: Listener<P>) -> Token {
        let token = Token(self.last_token.get() + 1);
        self.last_token.set(token.0);

        self.collection
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(Rc::new(Subscription {
                token,
                listener,
                live: Cell::new(true),
            }));

        trace!(event_type, %token, "bound listener");
        token
    }

    /// Dispatch `payload` to the current subscribers of `event_type`
    ///
    /// Returns the number of listeners invoked.
    ///
    /// # Panics
    ///
    /// A panicking listener unwinds out of `notify` and the listeners after
    /// it are skipped for that dispatch. No borrow of the bus is held while
    /// a listener runs, so the bus stays usable afterwards.
    pub fn notify(&self, event_type: &str, payload: &P) -> usize {
        let snapshot: Vec<Rc<Subscription<P>>> = match self.collection.borrow().get(event_type) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for subscription in snapshot {
            if !subscription.live.get() {
                continue;
            }
            (subscription.listener)(payload);
            invoked += 1;
        }

        trace!(event_type, invoked, "dispatched");
        invoked
    }

    /// Remove subscriptions according to `target`
    ///
    /// Returns the number of subscriptions removed. Removal never touches
    /// the token counter.
    pub fn unbind(&self, target: Unbind<'_, P>) -> usize {
        let mut collection = self.collection.borrow_mut();

        let removed = match target {
            Unbind::All => {
                let removed: usize = collection.values().map(Vec::len).sum();
                for subscription in collection.values().flatten() {
                    subscription.live.set(false);
                }
                collection.clear();
                removed
            }
            Unbind::Type(event_type) => match collection.remove(event_type) {
                Some(list) => {
                    for subscription in &list {
                        subscription.live.set(false);
                    }
                    list.len()
                }
                None => 0,
            },
            Unbind::Token(token) => {
                Self::remove_where(&mut collection, None, |s| s.token == token)
            }
            Unbind::Listener(listener) => {
                Self::remove_where(&mut collection, None, |s| s.uses(listener))
            }
            Unbind::TypeListener(event_type, listener) => {
                Self::remove_where(&mut collection, Some(event_type), |s| s.uses(listener))
            }
        };

        debug!(removed, "unbound listeners");
        removed
    }

    fn remove_where(
        collection: &mut HashMap<String, Vec<Rc<Subscription<P>>>>,
        only_type: Option<&str>,
        matches: impl Fn(&Subscription<P>) -> bool,
    ) -> usize {
        let mut removed = 0;
        for (event_type, list) in collection.iter_mut() {
            if only_type.is_some_and(|t| t != event_type.as_str()) {
                continue;
            }
            list.retain(|subscription| {
                if matches(subscription) {
                    subscription.live.set(false);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        collection.retain(|_, list| !list.is_empty());
        removed
    }

    /// Number of subscriptions for one type
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.collection
            .borrow()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Number of subscriptions across all types
    pub fn total_listeners(&self) -> usize {
        self.collection.borrow().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.borrow().is_empty()
    }

    /// Event types that currently have subscribers, sorted
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.collection.borrow().keys().cloned().collect();
        types.sort();
        types
    }

    /// Tokens subscribed under `event_type`, in dispatch order
    pub fn tokens(&self, event_type: &str) -> Vec<Token> {
        self.collection
            .borrow()
            .get(event_type)
            .map(|list| list.iter().map(|s| s.token).collect())
            .unwrap_or_default()
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("types", &self.event_types())
            .field("last_token", &self.last_token.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Listener<i32>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        let make = move |name: &str| {
            let log = Rc::clone(&log_clone);
            let name = name.to_string();
            listener(move |value: &i32| log.borrow_mut().push(format!("{name}:{value}")))
        };
        (log, make)
    }

    #[test]
    fn test_tokens_strictly_increase() {
        let bus: EventBus<i32> = EventBus::new();
        let a = bus.bind("a", listener(|_| {}));
        let b = bus.bind("b", listener(|_| {}));
        let c = bus.bind("a", listener(|_| {}));

        assert_eq!(a.value(), 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_tokens_not_reused_after_clear() {
        let bus: EventBus<i32> = EventBus::new();
        let first = bus.bind("a", listener(|_| {}));
        bus.unbind(Unbind::All);
        let second = bus.bind("a", listener(|_| {}));
        assert!(second > first);
    }

    #[test]
    fn test_dispatch_in_insertion_order() {
        let bus: EventBus<i32> = EventBus::new();
        let (log, make) = recorder();
        bus.bind("tick", make("first"));
        bus.bind("tick", make("second"));
        bus.bind("other", make("other"));

        assert_eq!(bus.notify("tick", &7), 2);
        assert_eq!(*log.borrow(), vec!["first:7", "second:7"]);
    }

    #[test]
    fn test_notify_unknown_type() {
        let bus: EventBus<i32> = EventBus::new();
        assert_eq!(bus.notify("nothing", &1), 0);
    }

    #[test]
    fn test_unbind_all_matches_fresh_bus() {
        let bus: EventBus<i32> = EventBus::new();
        let (log, make) = recorder();
        bus.bind("a", make("a"));
        bus.bind("b", make("b"));

        assert_eq!(bus.unbind(Unbind::All), 2);
        assert!(bus.is_empty());
        assert_eq!(bus.total_listeners(), 0);
        assert_eq!(bus.notify("a", &1) + bus.notify("b", &1), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_unbind_type() {
        let bus: EventBus<i32> = EventBus::new();
        let (log, make) = recorder();
        bus.bind("a", make("a1"));
        bus.bind("a", make("a2"));
        bus.bind("b", make("b"));

        assert_eq!(bus.unbind(Unbind::Type("a")), 2);
        bus.notify("a", &1);
        bus.notify("b", &1);
        assert_eq!(*log.borrow(), vec!["b:1"]);
        assert_eq!(bus.event_types(), vec!["b".to_string()]);
    }

    #[test]
    fn test_unbind_token_removes_exactly_one() {
        let bus: EventBus<i32> = EventBus::new();
        let shared = listener(|_: &i32| {});
        let first = bus.bind("a", Rc::clone(&shared));
        let second = bus.bind("a", Rc::clone(&shared));

        assert_eq!(bus.unbind(Unbind::Token(first)), 1);
        assert_eq!(bus.tokens("a"), vec![second]);
        assert_eq!(bus.unbind(Unbind::Token(first)), 0);
    }

    #[test]
    fn test_unbind_listener_across_types() {
        let bus: EventBus<i32> = EventBus::new();
        let (log, make) = recorder();
        let shared = make("shared");
        bus.bind("a", Rc::clone(&shared));
        bus.bind("a", Rc::clone(&shared));
        bus.bind("a", make("kept"));
        bus.bind("b", Rc::clone(&shared));

        assert_eq!(bus.unbind(Unbind::Listener(&shared)), 3);
        bus.notify("a", &1);
        bus.notify("b", &1);
        assert_eq!(*log.borrow(), vec!["kept:1"]);
    }

    #[test]
    fn test_unbind_type_listener_leaves_other_types() {
        let bus: EventBus<i32> = EventBus::new();
        let (log, make) = recorder();
        let shared = make("shared");
        bus.bind("a", Rc::clone(&shared));
        bus.bind("b", Rc::clone(&shared));

        assert_eq!(bus.unbind(Unbind::TypeListener("a", &shared)), 1);
        bus.notify("a", &1);
        bus.notify("b", &2);
        assert_eq!(*log.borrow(), vec!["shared:2"]);
    }

    #[test]
    fn test_adjacent_matches_all_removed() {
        let bus: EventBus<i32> = EventBus::new();
        let shared = listener(|_: &i32| {});
        for _ in 0..4 {
            bus.bind("a", Rc::clone(&shared));
        }
        let other = bus.bind("a", listener(|_| {}));

        assert_eq!(bus.unbind(Unbind::Listener(&shared)), 4);
        assert_eq!(bus.tokens("a"), vec![other]);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits_for_next_notify() {
        let bus: Rc<EventBus<i32>> = Rc::new(EventBus::new());
        let late_calls = Rc::new(Cell::new(0));

        let bus_clone = Rc::clone(&bus);
        let late_clone = Rc::clone(&late_calls);
        bus.bind(
            "go",
            listener(move |_| {
                let late = Rc::clone(&late_clone);
                bus_clone.bind("go", listener(move |_| late.set(late.get() + 1)));
            }),
        );

        assert_eq!(bus.notify("go", &0), 1);
        assert_eq!(late_calls.get(), 0);

        // second dispatch sees the listener added by the first one
        bus.notify("go", &0);
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn test_listener_removed_during_dispatch_is_skipped() {
        let bus: Rc<EventBus<i32>> = Rc::new(EventBus::new());
        let (log, make) = recorder();
        let victim = make("victim");

        let bus_clone = Rc::clone(&bus);
        let victim_clone = Rc::clone(&victim);
        bus.bind(
            "go",
            listener(move |_| {
                bus_clone.unbind(Unbind::Listener(&victim_clone));
            }),
        );
        bus.bind("go", Rc::clone(&victim));
        bus.bind("go", make("after"));

        assert_eq!(bus.notify("go", &5), 2);
        assert_eq!(*log.borrow(), vec!["after:5"]);
    }

    #[test]
    fn test_self_removal_during_dispatch_does_not_skip_neighbour() {
        let bus: Rc<EventBus<i32>> = Rc::new(EventBus::new());
        let (log, make) = recorder();

        let bus_clone = Rc::clone(&bus);
        let token = Rc::new(Cell::new(None));
        let token_clone = Rc::clone(&token);
        let first = bus.bind(
            "go",
            listener(move |_| {
                if let Some(own) = token_clone.get() {
                    bus_clone.unbind(Unbind::Token(own));
                }
            }),
        );
        token.set(Some(first));
        bus.bind("go", make("neighbour"));

        bus.notify("go", &1);
        bus.notify("go", &2);
        assert_eq!(*log.borrow(), vec!["neighbour:1", "neighbour:2"]);
        assert_eq!(bus.listener_count("go"), 1);
    }

    #[test]
    fn test_reentrant_notify() {
        let bus: Rc<EventBus<i32>> = Rc::new(EventBus::new());
        let (log, make) = recorder();

        let bus_clone = Rc::clone(&bus);
        bus.bind(
            "outer",
            listener(move |value| {
                bus_clone.notify("inner", &(value + 1));
            }),
        );
        bus.bind("inner", make("inner"));

        bus.notify("outer", &1);
        assert_eq!(*log.borrow(), vec!["inner:2"]);
    }

    #[test]
    fn test_unbind_all_during_dispatch_stops_remaining() {
        let bus: Rc<EventBus<i32>> = Rc::new(EventBus::new());
        let (log, make) = recorder();

        let bus_clone = Rc::clone(&bus);
        bus.bind(
            "go",
            listener(move |_| {
                bus_clone.unbind(Unbind::All);
            }),
        );
        bus.bind("go", make("never"));

        assert_eq!(bus.notify("go", &1), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_panicking_listener_propagates_and_bus_recovers() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let bus: EventBus<i32> = EventBus::new();
        let (log, make) = recorder();
        let faulty = bus.bind("save", listener(|_| panic!("listener failed")));
        bus.bind("save", make("after"));

        let outcome = catch_unwind(AssertUnwindSafe(|| bus.notify("save", &1)));
        assert!(outcome.is_err());
        assert!(log.borrow().is_empty());

        // the collection was not left borrowed
        assert_eq!(bus.unbind(Unbind::Token(faulty)), 1);
        assert_eq!(bus.notify("save", &2), 1);
        assert_eq!(*log.borrow(), vec!["after:2"]);
        assert!(bus.bind("save", listener(|_| {})) > faulty);
    }
}
