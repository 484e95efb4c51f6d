//! Component base: private store, event bus and the lifecycle contract
//!
//! Every View, Model, Action and dynamically defined component embeds a
//! [`ComponentBase`]. The event methods live on the [`Events`] trait, which
//! is implemented for every [`Component`] by a blanket impl, so no component
//! can replace `bind`, `notify` or `unbind` with its own version.
//!
//! Components are shared as `Rc<Self>` and keep a weak handle to themselves
//! (built with `Rc::new_cyclic`), which is how listeners get the owning
//! instance as their default context without creating reference cycles.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::bus::{EventBus, Listener, Token, Unbind};
use crate::error::Result;
use crate::store::PrivateStore;
use crate::transport::{Completion, TransportFailure};

/// Payload carried by component buses
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The view's DOM is ready to be wired
    Ready,
    /// A model request completed: result, sent params, raw response
    Request(Completion),
    /// A model request failed
    Error(TransportFailure),
    /// Application-defined positional arguments
    Emit(Vec<Value>),
}

impl Signal {
    pub fn emit(args: impl IntoIterator<Item = Value>) -> Self {
        Signal::Emit(args.into_iter().collect())
    }

    /// Positional arguments of an `Emit`, empty for every other variant
    pub fn args(&self) -> &[Value] {
        match self {
            Signal::Emit(args) => args,
            _ => &[],
        }
    }
}

/// State every component is built on
pub struct ComponentBase {
    store: RefCell<PrivateStore>,
    bus: EventBus<Signal>,
}

impl Default for ComponentBase {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBase {
    pub fn new() -> Self {
        Self {
            store: RefCell::new(PrivateStore::new()),
            bus: EventBus::new(),
        }
    }

    /// Run an authorization hook, then build the base
    ///
    /// If the hook fails nothing is constructed, in particular no bus.
    pub fn authorized(hook: impl FnOnce() -> Result<()>) -> Result<Self> {
        hook()?;
        Ok(Self::new())
    }

    pub(crate) fn store(&self) -> Ref<'_, PrivateStore> {
        self.store.borrow()
    }

    pub(crate) fn store_mut(&self) -> RefMut<'_, PrivateStore> {
        self.store.borrow_mut()
    }

    /// Number of live subscriptions, for diagnostics and tests
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.bus.listener_count(event_type)
    }

    pub fn total_listeners(&self) -> usize {
        self.bus.total_listeners()
    }
}

impl std::fmt::Debug for ComponentBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBase")
            .field("store", &*self.store.borrow())
            .field("bus", &self.bus)
            .finish()
    }
}

/// The small interface a concrete component provides
pub trait Component: 'static {
    fn base(&self) -> &ComponentBase;

    /// Weak handle to the `Rc` this component lives in
    fn this(&self) -> Weak<Self>
    where
        Self: Sized;

    /// Release owned resources; the default has nothing to release
    fn destroy(&self) {}
}

/// Event methods shared by all components
pub trait Events: Component {
    /// Subscribe with the component itself as listener context
    fn bind(&self, event_type: &str, f: impl Fn(&Self, &Signal) + 'static) -> Token
    where
        Self: Sized;

    /// Subscribe with an explicit context, held weakly
    fn bind_with<C: 'static>(
        &self,
        event_type: &str,
        context: &Rc<C>,
        f: impl Fn(&C, &Signal) + 'static,
    ) -> Token
    where
        Self: Sized;

    /// Subscribe a shared listener, which can later be unbound by reference
    fn bind_listener(&self, event_type: &str, listener: Listener<Signal>) -> Token;

    fn notify(&self, event_type: &str, signal: &Signal) -> usize;

    fn unbind(&self, target: Unbind<'_, Signal>) -> usize;
}

impl<T: Component> Events for T {
    fn bind(&self, event_type: &str, f: impl Fn(&Self, &Signal) + 'static) -> Token {
        let me = self.this();
        self.base().bus.bind(
            event_type,
            Rc::new(move |signal: &Signal| {
                if let Some(me) = me.upgrade() {
                    f(&*me, signal);
                }
            }),
        )
    }

    fn bind_with<C: 'static>(
        &self,
        event_type: &str,
        context: &Rc<C>,
        f: impl Fn(&C, &Signal) + 'static,
    ) -> Token {
        let context = Rc::downgrade(context);
        self.base().bus.bind(
            event_type,
            Rc::new(move |signal: &Signal| {
                if let Some(context) = context.upgrade() {
                    f(&*context, signal);
                }
            }),
        )
    }

    fn bind_listener(&self, event_type: &str, listener: Listener<Signal>) -> Token {
        self.base().bus.bind(event_type, listener)
    }

    fn notify(&self, event_type: &str, signal: &Signal) -> usize {
        self.base().bus.notify(event_type, signal)
    }

    fn unbind(&self, target: Unbind<'_, Signal>) -> usize {
        self.base().bus.unbind(target)
    }
}

/// Hook run by a component's first `init` call
pub type InitHook<C> = Box<dyn FnOnce(&C, &Value)>;

/// One-shot `init` gate: the first call runs the hook, later calls are absorbed
pub struct OneShot<C> {
    hook: RefCell<Option<InitHook<C>>>,
    done: Cell<bool>,
}

impl<C> OneShot<C> {
    pub fn new(hook: Option<InitHook<C>>) -> Self {
        Self {
            hook: RefCell::new(hook),
            done: Cell::new(false),
        }
    }

    /// Close the gate; true only for the first caller
    pub fn claim(&self) -> bool {
        !self.done.replace(true)
    }

    /// Claim the gate and run the hook; false if already claimed
    pub fn run(&self, context: &C, args: &Value) -> bool {
        if !self.claim() {
            return false;
        }
        self.run_hook(context, args);
        true
    }

    /// Run the hook if still present, regardless of the gate
    pub(crate) fn run_hook(&self, context: &C, args: &Value) {
        let hook = self.hook.borrow_mut().take();
        if let Some(hook) = hook {
            hook(context, args);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}
