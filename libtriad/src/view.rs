//! View: template rendering plus declarative DOM event wiring
//!
//! A view is created with its template source, its root selector and an
//! [`EventMap`]. Nothing touches the DOM until the view is notified with
//! `ready`: at that point it selects its root, binds the declared events,
//! runs its `ready` hook, and schedules its own `ready` listener for removal
//! on the next turn so every other `ready` listener of the same dispatch
//! still runs.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use crate::bag::Bag;
use crate::binder::{bind_parsed, unbind_events, DomBinding, EventMap, ParsedEvents};
use crate::bus::{Listener, Unbind};
use crate::component::{Component, ComponentBase, Events, InitHook, OneShot, Signal};
use crate::config::Config;
use crate::dom::{DomHost, ElementSet, Selection};
use crate::error::{ConfigError, Result};
use crate::runtime::Scheduler;
use crate::template::{BlockEngine, CompiledTemplate, FilterRegistry, TemplateEngine};

const CONFIG_SLOT: &str = "config";
const BINDINGS_SLOT: &str = "nativeEvent";

/// Hook run once the view's DOM events are bound
pub type ReadyHook = Box<dyn FnOnce(&View)>;

/// What a view is made of
pub struct ViewOptions {
    /// Template source, compiled eagerly
    pub template: String,
    /// Root selector; falls back to `[view] main` from the config
    pub main: Option<String>,
    pub events: EventMap<View>,
    /// Run by the first `init` call with its arguments
    pub init: Option<InitHook<View>>,
    pub ready: Option<ReadyHook>,
    /// Initial contents of the config bag
    pub config: Map<String, Value>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            template: String::new(),
            main: None,
            events: EventMap::new(),
            init: None,
            ready: None,
            config: Map::new(),
        }
    }
}

/// Collaborators a view works with
#[derive(Clone)]
pub struct ViewEnv {
    pub dom: Rc<dyn DomHost>,
    pub engine: Rc<dyn TemplateEngine>,
    pub filters: FilterRegistry,
    pub scheduler: Rc<dyn Scheduler>,
    pub config: Config,
}

impl ViewEnv {
    /// Default engine, default filters, default config
    pub fn new(dom: Rc<dyn DomHost>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            dom,
            engine: Rc::new(BlockEngine),
            filters: FilterRegistry::with_defaults(),
            scheduler,
            config: Config::default_config(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

pub struct View {
    base: ComponentBase,
    me: Weak<View>,
    env: ViewEnv,
    main: String,
    template: RefCell<Box<dyn CompiledTemplate>>,
    events: ParsedEvents<View>,
    gate: OneShot<View>,
    ready_hook: RefCell<Option<ReadyHook>>,
    ready_listener: RefCell<Option<Listener<Signal>>>,
    root: RefCell<Option<Selection>>,
    wired: Cell<bool>,
}

impl View {
    /// Build a view and start listening for `ready`
    ///
    /// # Errors
    ///
    /// `ConfigError::BadEventKey` for a malformed event key and
    /// `ConfigError::InvalidTemplate` for a template that does not compile.
    pub fn create(options: ViewOptions, env: ViewEnv) -> Result<Rc<Self>> {
        let events = options.events.parse()?;
        let template = compile(&env, &options.template)?;
        let main = options
            .main
            .unwrap_or_else(|| env.config.view.main.clone());

        let view = Rc::new_cyclic(|me| View {
            base: ComponentBase::new(),
            me: me.clone(),
            env,
            main,
            template: RefCell::new(template),
            events,
            gate: OneShot::new(options.init),
            ready_hook: RefCell::new(options.ready),
            ready_listener: RefCell::new(None),
            root: RefCell::new(None),
            wired: Cell::new(false),
        });

        {
            let mut store = view.base.store_mut();
            store.set(CONFIG_SLOT, Bag::from(options.config));
            store.set(BINDINGS_SLOT, Vec::<DomBinding>::new());
        }

        let me = Rc::downgrade(&view);
        let listener: Listener<Signal> = Rc::new(move |_: &Signal| {
            if let Some(view) = me.upgrade() {
                view.wire();
            }
        });
        view.bind_listener("ready", Rc::clone(&listener));
        *view.ready_listener.borrow_mut() = Some(listener);

        tracing::debug!(main = %view.main, events = view.events.len(), "created view");
        Ok(view)
    }

    /// Run the init hook; later calls are absorbed
    pub fn init(&self, args: &Value) -> bool {
        self.gate.run(self, args)
    }

    fn wire(&self) {
        if self.wired.replace(true) {
            tracing::debug!(main = %self.main, "view already wired, ignoring ready");
            return;
        }

        let root = self.env.dom.select(&self.main);
        if root.is_empty() {
            tracing::warn!(main = %self.main, "view root matched no elements");
        }

        // keys were parsed in `create`
        let bindings = bind_parsed(self.env.dom.as_ref(), &self.events, &self.me, &root);
        tracing::info!(main = %self.main, bindings = bindings.len(), "view ready");
        self.base.store_mut().set(BINDINGS_SLOT, bindings);
        *self.root.borrow_mut() = Some(root);

        let hook = self.ready_hook.borrow_mut().take();
        if let Some(hook) = hook {
            hook(self);
        }

        let me = self.me.clone();
        self.env.scheduler.defer(Box::new(move || {
            let Some(view) = me.upgrade() else {
                return;
            };
            let listener = view.ready_listener.borrow_mut().take();
            if let Some(listener) = listener {
                view.unbind(Unbind::TypeListener("ready", &listener));
            }
        }));
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.with_config(|bag| bag.get(key).cloned())
    }

    pub fn set_config(&self, key: &str, value: Value) {
        self.with_config_mut(|bag| bag.set(key, value));
    }

    pub fn merge_config(&self, entries: Map<String, Value>) {
        self.with_config_mut(|bag| bag.merge(entries));
    }

    pub fn config_all(&self) -> Map<String, Value> {
        self.with_config(Bag::all)
    }

    fn with_config<T>(&self, f: impl FnOnce(&Bag) -> T) -> T {
        let store = self.base.store();
        match store.get::<Bag>(CONFIG_SLOT) {
            Some(bag) => f(bag),
            None => f(&Bag::new()),
        }
    }

    fn with_config_mut(&self, f: impl FnOnce(&mut Bag)) {
        let mut store = self.base.store_mut();
        match store.get_mut::<Bag>(CONFIG_SLOT) {
            Some(bag) => f(bag),
            None => {
                let mut bag = Bag::new();
                f(&mut bag);
                store.set(CONFIG_SLOT, bag);
            }
        }
    }

    /// Replace the compiled template
    pub fn set_template(&self, source: &str) -> Result<()> {
        let template = compile(&self.env, source)?;
        *self.template.borrow_mut() = template;
        Ok(())
    }

    /// Render a block of the template
    pub fn render(&self, block: &str, data: &Value) -> Result<String> {
        self.template.borrow().render(block, data)
    }

    /// Render a block and write it into every element matching `selector`
    pub fn render_into(&self, block: &str, data: &Value, selector: &str) -> Result<String> {
        let html = self.render(block, data)?;
        self.env.dom.select(selector).set_html(&html);
        Ok(html)
    }

    pub fn select(&self, selector: &str) -> Selection {
        self.env.dom.select(selector)
    }

    /// Root selection, available once the view is ready
    pub fn root(&self) -> Option<Selection> {
        self.root.borrow().clone()
    }

    pub fn main_selector(&self) -> &str {
        &self.main
    }

    pub fn is_ready(&self) -> bool {
        self.wired.get()
    }

    /// Live DOM bindings
    pub fn binding_count(&self) -> usize {
        self.base
            .store()
            .get::<Vec<DomBinding>>(BINDINGS_SLOT)
            .map_or(0, Vec::len)
    }
}

fn compile(env: &ViewEnv, source: &str) -> Result<Box<dyn CompiledTemplate>> {
    env.engine
        .compile(source, &env.filters)
        .map_err(|e| ConfigError::InvalidTemplate(e.to_string()).into())
}

impl Component for View {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn this(&self) -> Weak<Self> {
        self.me.clone()
    }

    /// Tear down DOM bindings, then drop every bus subscription
    fn destroy(&self) {
        let bindings = self
            .base
            .store_mut()
            .remove::<Vec<DomBinding>>(BINDINGS_SLOT);
        let mut bindings = bindings.unwrap_or_default();
        let removed = unbind_events(&mut bindings);
        self.ready_listener.borrow_mut().take();
        self.unbind(Unbind::All);
        tracing::info!(main = %self.main, bindings = removed, "view destroyed");
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("main", &self.main)
            .field("events", &self.events)
            .field("ready", &self.wired.get())
            .field("base", &self.base)
            .finish()
    }
}
