//! Dynamically defined component classes
//!
//! Most components are concrete Rust types implementing
//! [`Component`](crate::component::Component). `ComponentClass` covers the
//! other case: a class assembled at runtime from a table of named methods,
//! whose instances still get the private store and event bus of every
//! component.
//!
//! The event and storage primitives can never be replaced. Defining or
//! extending a class with a method named `malloc`, `bind`, `notify` or
//! `unbind` fails with [`ConfigError::ReservedName`] when the table is
//! handed over, not when the method is later called.
//!
//! # Examples
//!
//! ```
//! use libtriad::factory::{method, ComponentClass};
//! use serde_json::json;
//!
//! let greeter = ComponentClass::define(
//!     "Greeter",
//!     vec![(
//!         "greet",
//!         method(|_, args| Ok(json!(format!("hello {}", args[0].as_str().unwrap_or("?"))))),
//!     )],
//! )
//! .unwrap();
//!
//! let instance = greeter.construct(&[]).unwrap();
//! assert_eq!(instance.call("greet", &[json!("ada")]).unwrap(), json!("hello ada"));
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::component::{Component, ComponentBase};
use crate::error::{ConfigError, Result, TriadError};

/// Method names no class may define
///
/// Matched exactly and case-sensitively: `rebind` or `notifyLater` are
/// ordinary method names.
pub const RESERVED_NAMES: [&str; 4] = ["malloc", "bind", "notify", "unbind"];

/// A method body: receives the instance and positional arguments
pub type Method = Rc<dyn Fn(&Instance, &[Value]) -> Result<Value>>;

/// Static authorization hook, run with the constructor arguments
pub type AuthHook = Rc<dyn Fn(&[Value]) -> Result<()>>;

/// Wrap a closure as a [`Method`]
pub fn method(f: impl Fn(&Instance, &[Value]) -> Result<Value> + 'static) -> Method {
    Rc::new(f)
}

fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// A runtime-defined component class
pub struct ComponentClass {
    name: String,
    methods: RefCell<BTreeMap<String, Method>>,
    auth: RefCell<Option<AuthHook>>,
}

impl ComponentClass {
    /// Define a class from a method table
    ///
    /// # Errors
    ///
    /// `ConfigError::ReservedName` if the table names a reserved method.
    pub fn define<N: Into<String>>(
        name: &str,
        methods: impl IntoIterator<Item = (N, Method)>,
    ) -> Result<Rc<Self>> {
        let class = Self {
            name: name.to_string(),
            methods: RefCell::new(BTreeMap::new()),
            auth: RefCell::new(None),
        };
        class.extend(methods)?;
        tracing::debug!(class = %class.name, methods = class.methods.borrow().len(), "defined component class");
        Ok(Rc::new(class))
    }

    /// Add or replace methods on an existing class
    ///
    /// The whole table is checked first; a reserved name leaves the class
    /// untouched.
    pub fn extend<N: Into<String>>(
        &self,
        methods: impl IntoIterator<Item = (N, Method)>,
    ) -> Result<()> {
        let methods: Vec<(String, Method)> = methods
            .into_iter()
            .map(|(name, body)| (name.into(), body))
            .collect();

        if let Some((name, _)) = methods.iter().find(|(name, _)| is_reserved(name)) {
            return Err(ConfigError::ReservedName(name.clone()).into());
        }

        let mut table = self.methods.borrow_mut();
        for (name, body) in methods {
            table.insert(name, body);
        }
        Ok(())
    }

    /// Attach the authorization hook run before every construction
    pub fn with_auth(&self, hook: impl Fn(&[Value]) -> Result<()> + 'static) {
        *self.auth.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.borrow().contains_key(name)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.borrow().keys().cloned().collect()
    }

    fn lookup(&self, name: &str) -> Option<Method> {
        self.methods.borrow().get(name).cloned()
    }

    /// Build an instance
    ///
    /// The authorization hook, if any, runs first with `args`; when it fails
    /// no component state is created at all. Arguments are kept in the
    /// instance's private store under `args` and never add methods.
    pub fn construct(self: &Rc<Self>, args: &[Value]) -> Result<Rc<Instance>> {
        let auth = self.auth.borrow().clone();
        let base = ComponentBase::authorized(|| match auth {
            Some(hook) => hook(args),
            None => Ok(()),
        })?;
        base.store_mut().set("args", args.to_vec());

        Ok(Rc::new_cyclic(|me| Instance {
            base,
            me: me.clone(),
            class: Rc::clone(self),
        }))
    }
}

impl std::fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .field("auth", &self.auth.borrow().is_some())
            .finish()
    }
}

/// An instance of a [`ComponentClass`]
pub struct Instance {
    base: ComponentBase,
    me: Weak<Instance>,
    class: Rc<ComponentClass>,
}

impl Instance {
    pub fn class(&self) -> &Rc<ComponentClass> {
        &self.class
    }

    /// Invoke a method by name
    ///
    /// # Errors
    ///
    /// `TriadError::UnknownMethod` if the class has no such method, otherwise
    /// whatever the method body returns.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let body = self
            .class
            .lookup(name)
            .ok_or_else(|| TriadError::UnknownMethod(format!("{}::{}", self.class.name, name)))?;
        body(self, args)
    }

    /// Constructor arguments this instance was built with
    pub fn args(&self) -> Vec<Value> {
        self.base
            .store()
            .get::<Vec<Value>>("args")
            .cloned()
            .unwrap_or_default()
    }

    /// Read a private slot
    pub fn malloc(&self, key: &str) -> Option<Value> {
        self.base.store().get::<Value>(key).cloned()
    }

    /// Write a private slot
    pub fn malloc_set(&self, key: &str, value: Value) {
        self.base.store_mut().set(key, value);
    }
}

impl Component for Instance {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn this(&self) -> Weak<Self> {
        self.me.clone()
    }

    /// Runs the class's `destroy` method when it defines one
    fn destroy(&self) {
        if self.class.has_method("destroy") {
            if let Err(e) = self.call("destroy", &[]) {
                tracing::warn!(class = %self.class.name, error = %e, "destroy method failed");
            }
        }
    }
}
