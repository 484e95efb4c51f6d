//! Action: the controller of a view/model pair
//!
//! An action holds one [`View`] and one [`Model`], relays their bus events
//! to its own handlers and sequences their lifecycle. Relay keys read
//! `view:<event>` or `model:<event>`; the handler runs with the action as
//! context whenever that sub-component notifies the event.

use std::rc::{Rc, Weak};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::bus::Unbind;
use crate::component::{Component, ComponentBase, Events, InitHook, OneShot, Signal};
use crate::error::{ConfigError, Result, TriadError};
use crate::model::Model;
use crate::view::View;

const RELAY_KEY_PATTERN: &str = r"^\s*(view|model)\s*:\s*(\S+)\s*$";

fn relay_key_regex() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(regex) = PATTERN.get() {
        return Ok(regex);
    }
    let regex = Regex::new(RELAY_KEY_PATTERN)
        .map_err(|e| TriadError::Assertion(format!("relay key pattern: {}", e)))?;
    Ok(PATTERN.get_or_init(|| regex))
}

/// Handler for a relayed event, run with the action as context
pub type RelayHandler = Rc<dyn Fn(&Action, &Signal)>;

/// Which half of the triad a relay listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySource {
    View,
    Model,
}

/// A parsed relay key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayKey {
    pub source: RelaySource,
    pub event_type: String,
}

impl std::str::FromStr for RelayKey {
    type Err = TriadError;

    fn from_str(key: &str) -> Result<Self> {
        let captures = relay_key_regex()?
            .captures(key)
            .ok_or_else(|| ConfigError::BadRelayKey(key.to_string()))?;
        let source = match captures.get(1).map(|m| m.as_str()) {
            Some("view") => RelaySource::View,
            _ => RelaySource::Model,
        };
        Ok(Self {
            source,
            event_type: captures
                .get(2)
                .map_or_else(String::new, |m| m.as_str().to_string()),
        })
    }
}

pub struct ActionOptions {
    pub view: Rc<View>,
    pub model: Rc<Model>,
    /// Relay keys and their handlers, bound in order
    pub events: Vec<(String, RelayHandler)>,
    /// Passed to the model's `init`
    pub datasource: Value,
    /// Passed to the view's `init`
    pub page: Value,
    pub init: Option<InitHook<Action>>,
}

impl ActionOptions {
    pub fn new(view: Rc<View>, model: Rc<Model>) -> Self {
        Self {
            view,
            model,
            events: Vec::new(),
            datasource: Value::Null,
            page: Value::Null,
            init: None,
        }
    }

    /// Builder-style relay registration
    pub fn relay(mut self, key: &str, handler: impl Fn(&Action, &Signal) + 'static) -> Self {
        self.events.push((key.to_string(), Rc::new(handler)));
        self
    }
}

pub struct Action {
    base: ComponentBase,
    me: Weak<Action>,
    view: Rc<View>,
    model: Rc<Model>,
    datasource: Value,
    page: Value,
    gate: OneShot<Action>,
    relays: Vec<RelayKey>,
}

impl Action {
    /// Build an action and subscribe its relays
    ///
    /// # Errors
    ///
    /// `ConfigError::BadRelayKey` for the first malformed key; no relay is
    /// subscribed in that case.
    pub fn create(options: ActionOptions) -> Result<Rc<Self>> {
        let relays = options
            .events
            .into_iter()
            .map(|(key, handler)| Ok((key.parse::<RelayKey>()?, handler)))
            .collect::<Result<Vec<_>>>()?;

        let action = Rc::new_cyclic(|me| Action {
            base: ComponentBase::new(),
            me: me.clone(),
            view: options.view,
            model: options.model,
            datasource: options.datasource,
            page: options.page,
            gate: OneShot::new(options.init),
            relays: relays.iter().map(|(key, _)| key.clone()).collect(),
        });

        for (key, handler) in relays {
            let relay = move |action: &Action, signal: &Signal| handler(action, signal);
            match key.source {
                RelaySource::View => action.view.bind_with(&key.event_type, &action, relay),
                RelaySource::Model => action.model.bind_with(&key.event_type, &action, relay),
            };
            tracing::debug!(source = ?key.source, event = %key.event_type, "relay subscribed");
        }

        Ok(action)
    }

    /// Initialize model, then view, then run the action's own hook
    ///
    /// Only the first call does anything.
    pub fn init(&self, args: &Value) -> bool {
        if !self.gate.claim() {
            return false;
        }
        self.model.init(&self.datasource);
        self.view.init(&self.page);
        self.gate.run_hook(self, args);
        tracing::info!(relays = self.relays.len(), "action initialized");
        true
    }

    pub fn view(&self) -> &Rc<View> {
        &self.view
    }

    pub fn model(&self) -> &Rc<Model> {
        &self.model
    }

    pub fn datasource(&self) -> &Value {
        &self.datasource
    }

    pub fn page(&self) -> &Value {
        &self.page
    }

    pub fn relays(&self) -> &[RelayKey] {
        &self.relays
    }
}

impl Component for Action {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn this(&self) -> Weak<Self> {
        self.me.clone()
    }

    /// Drop own subscriptions, then destroy the view, then the model
    fn destroy(&self) {
        self.unbind(Unbind::All);
        self.view.destroy();
        self.model.destroy();
        tracing::info!("action destroyed");
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("relays", &self.relays)
            .field("view", &self.view)
            .field("model", &self.model)
            .finish()
    }
}
