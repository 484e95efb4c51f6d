//! Declarative DOM event binding
//!
//! Views describe their DOM handlers as a map from key strings to handlers.
//! A key reads `[flags] [types] selector`:
//!
//! ```text
//! "[tap] .btn"            direct tap handler on every `.btn`
//! "@[tap, click] li.item" one handler on the root, delegated to `li.item`
//! "![submit] form"        keeps firing until the handler returns true
//! "@![tap] .more"         delegated and once
//! "[keyup]"               empty selector: the root itself
//! ```
//!
//! A once handler stays armed while it returns `false`; the first other
//! return closes the gate. The native listener stays attached until the
//! binding is torn down.
//!
//! [`EventMap::parse`] checks every key of a batch up front, so a malformed
//! key fails the whole batch before anything is attached. Binding a
//! [`ParsedEvents`] cannot fail. Each resulting [`DomBinding`] removes
//! exactly what it attached.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::dom::{DomEvent, DomHandler, DomHost, ElementSet, Selection};
use crate::error::{ConfigError, Result, TriadError};

const EVENT_KEY_PATTERN: &str = r"(?s)^\s*([@!]{0,2})\s*\[([A-Za-z,\s]*)\]\s*(.*)$";

fn event_key_regex() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(regex) = PATTERN.get() {
        return Ok(regex);
    }
    let regex = Regex::new(EVENT_KEY_PATTERN)
        .map_err(|e| TriadError::Assertion(format!("event key pattern: {}", e)))?;
    Ok(PATTERN.get_or_init(|| regex))
}

/// A parsed event key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKey {
    pub delegated: bool,
    pub once: bool,
    pub types: Vec<String>,
    /// Empty means the view's root
    pub selector: String,
}

impl FromStr for EventKey {
    type Err = TriadError;

    fn from_str(key: &str) -> Result<Self> {
        let bad_key = || TriadError::from(ConfigError::BadEventKey(key.to_string()));
        let captures = event_key_regex()?.captures(key).ok_or_else(bad_key)?;

        let flags = captures.get(1).map_or("", |m| m.as_str());
        let delegated = flags.matches('@').count();
        let once = flags.matches('!').count();
        if delegated > 1 || once > 1 {
            return Err(bad_key());
        }

        let types: Vec<String> = captures
            .get(2)
            .map_or("", |m| m.as_str())
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if types.is_empty() {
            return Err(bad_key());
        }

        Ok(Self {
            delegated: delegated == 1,
            once: once == 1,
            types,
            selector: captures
                .get(3)
                .map_or("", |m| m.as_str())
                .trim()
                .to_string(),
        })
    }
}

/// Handler bound to a context: returns `false` to keep a once-binding armed
pub type EventHandler<C> = Rc<dyn Fn(&C, &DomEvent, &Selection) -> bool>;

/// Ordered map of event keys to handlers
pub struct EventMap<C> {
    entries: Vec<(String, EventHandler<C>)>,
}

impl<C> Default for EventMap<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C> Clone for EventMap<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<C> EventMap<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn on(
        mut self,
        key: impl Into<String>,
        handler: impl Fn(&C, &DomEvent, &Selection) -> bool + 'static,
    ) -> Self {
        self.insert(key, Rc::new(handler));
        self
    }

    /// Add a handler; a key already present is replaced in place
    pub fn insert(&mut self, key: impl Into<String>, handler: EventHandler<C>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((key, handler)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every key without binding anything
    pub fn validate(&self) -> Result<()> {
        self.parse().map(|_| ())
    }

    /// Parse every key, keeping the handlers in insertion order
    ///
    /// # Errors
    ///
    /// `ConfigError::BadEventKey` for the first malformed key.
    pub fn parse(&self) -> Result<ParsedEvents<C>> {
        let entries = self
            .entries
            .iter()
            .map(|(key, handler)| {
                Ok(ParsedEvent {
                    key: key.clone(),
                    event_key: key.parse()?,
                    handler: Rc::clone(handler),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ParsedEvents { entries })
    }
}

impl<C> std::fmt::Debug for EventMap<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

struct ParsedEvent<C> {
    key: String,
    event_key: EventKey,
    handler: EventHandler<C>,
}

/// An [`EventMap`] whose keys are known to be well formed
pub struct ParsedEvents<C> {
    entries: Vec<ParsedEvent<C>>,
}

impl<C> ParsedEvents<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn event_keys(&self) -> impl Iterator<Item = &EventKey> {
        self.entries.iter().map(|entry| &entry.event_key)
    }
}

impl<C> std::fmt::Debug for ParsedEvents<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| &entry.key))
            .finish()
    }
}

/// One live binding and the exact inverse of it
pub struct DomBinding {
    key: String,
    teardown: Box<dyn FnOnce()>,
}

impl DomBinding {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove what this binding attached; consumes the binding
    pub fn teardown(self) {
        tracing::debug!(key = %self.key, "tearing down dom binding");
        (self.teardown)();
    }
}

impl std::fmt::Debug for DomBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomBinding").field("key", &self.key).finish()
    }
}

/// Wrap a context handler into a native handler with the once gate
fn gate<C: 'static>(once: bool, handler: EventHandler<C>, context: Weak<C>) -> DomHandler {
    let armed = Cell::new(true);
    Rc::new(move |event: &DomEvent, this: &Selection| {
        if !armed.get() {
            return;
        }
        let Some(context) = context.upgrade() else {
            return;
        };
        let keep_armed = !handler(&*context, event, this);
        if once && !keep_armed {
            armed.set(false);
        }
    })
}

/// Attach every handler of `events`, with `context` as handler context
///
/// # Errors
///
/// `ConfigError::BadEventKey` for the first malformed key; nothing is
/// attached in that case.
pub fn bind_events<C: 'static>(
    host: &dyn DomHost,
    events: &EventMap<C>,
    context: &Weak<C>,
    root: &Selection,
) -> Result<Vec<DomBinding>> {
    let parsed = events.parse()?;
    Ok(bind_parsed(host, &parsed, context, root))
}

/// Attach every handler of an already parsed map
///
/// Direct bindings select their elements through `host`; delegated bindings
/// attach to `root`. An empty selector means `root` in both cases.
pub fn bind_parsed<C: 'static>(
    host: &dyn DomHost,
    events: &ParsedEvents<C>,
    context: &Weak<C>,
    root: &Selection,
) -> Vec<DomBinding> {
    let mut bindings = Vec::with_capacity(events.len());
    for ParsedEvent {
        key,
        event_key,
        handler,
    } in &events.entries
    {
        let native = gate(event_key.once, Rc::clone(handler), context.clone());
        let types = event_key.types.clone();

        let teardown: Box<dyn FnOnce()> = if event_key.delegated && !event_key.selector.is_empty() {
            for event_type in &types {
                root.delegate(&event_key.selector, event_type, Rc::clone(&native));
            }
            let root = Rc::clone(root);
            let selector = event_key.selector.clone();
            Box::new(move || {
                for event_type in &types {
                    root.undelegate(&selector, event_type, &native);
                }
            })
        } else {
            let target = if event_key.selector.is_empty() {
                Rc::clone(root)
            } else {
                host.select(&event_key.selector)
            };
            if target.is_empty() {
                tracing::debug!(key = %key, "selector matched no elements");
            }
            for event_type in &types {
                target.on(event_type, Rc::clone(&native));
            }
            Box::new(move || {
                for event_type in &types {
                    target.off(event_type, &native);
                }
            })
        };

        tracing::debug!(key = %key, delegated = event_key.delegated, once = event_key.once, "bound dom event");
        bindings.push(DomBinding {
            key: key.clone(),
            teardown,
        });
    }

    bindings
}

/// Tear down bindings newest first until the list is empty
pub fn unbind_events(bindings: &mut Vec<DomBinding>) -> usize {
    let mut removed = 0;
    while let Some(binding) = bindings.pop() {
        binding.teardown();
        removed += 1;
    }
    removed
}
