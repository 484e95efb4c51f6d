//! Model: nested data, request parameters, named endpoints and requests
//!
//! A model owns three stores: a [`DataTree`] addressed by dotted paths, a
//! parameter bag used as the default request parameters, and a config bag
//! that doubles as a table of named endpoints. [`Model::request`] resolves
//! an endpoint, sends one call through the [`Transport`] and reports the
//! outcome on the bus (`request` or `error`) before invoking the caller's
//! callback.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::FutureExt;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::bag::Bag;
use crate::bus::Unbind;
use crate::component::{Component, ComponentBase, Events, InitHook, OneShot, Signal};
use crate::config::{Config, RequestConfig};
use crate::data::DataTree;
use crate::error::{ensure, ConfigError, Result};
use crate::runtime::Scheduler;
use crate::transport::{Completion, Params, RequestSettings, Response, Transport, TransportFailure};

const CONFIG_SLOT: &str = "config";
const PARAM_SLOT: &str = "param";

/// Header marking framework requests
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";

/// Header carrying the per-request correlation token
pub const AUTH_TOKEN_HEADER: &str = "X-Requested-Auth-Token";

/// Parameter carrying the correlation token unless the caller set one
pub const TOKEN_PARAM: &str = "token";

pub type SuccessCallback = Box<dyn FnOnce(&Model, &Completion)>;
pub type FailureCallback = Box<dyn FnOnce(&Model, &TransportFailure)>;

/// Handle of an in-flight request; awaiting it is optional
///
/// Resolves once the completion has been delivered (or suppressed). Resolves
/// to `Err(Canceled)` when the scheduler dropped the request before it ran.
#[derive(Debug)]
pub struct RequestHandle {
    done: oneshot::Receiver<()>,
}

impl Future for RequestHandle {
    type Output = std::result::Result<(), oneshot::Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.done.poll_unpin(cx)
    }
}

#[derive(Default)]
pub struct ModelOptions {
    /// Config bag, typically named endpoints
    pub config: Map<String, Value>,
    /// Initial data tree
    pub data: Map<String, Value>,
    /// Default request parameters
    pub param: Map<String, Value>,
    pub init: Option<InitHook<Model>>,
}

/// Collaborators a model works with
#[derive(Clone)]
pub struct ModelEnv {
    pub transport: Rc<dyn Transport>,
    /// Runs the transport round-trip off the caller's stack
    pub scheduler: Rc<dyn Scheduler>,
    pub request: RequestConfig,
    /// Seeded into the config bag before the model's own config
    pub endpoints: Map<String, Value>,
}

impl ModelEnv {
    pub fn new(transport: Rc<dyn Transport>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            transport,
            scheduler,
            request: RequestConfig::default(),
            endpoints: Map::new(),
        }
    }

    /// Take request defaults and endpoints from a loaded config
    pub fn with_config(mut self, config: &Config) -> Self {
        self.request = config.request.clone();
        self.endpoints = config.endpoint_map();
        self
    }
}

pub struct Model {
    base: ComponentBase,
    me: Weak<Model>,
    env: ModelEnv,
    data: RefCell<DataTree>,
    gate: OneShot<Model>,
    destroyed: Cell<bool>,
}

impl Model {
    pub fn create(options: ModelOptions, env: ModelEnv) -> Rc<Self> {
        let mut config = Bag::from(env.endpoints.clone());
        config.merge(options.config);

        let mut data = DataTree::new();
        data.merge(options.data);

        let model = Rc::new_cyclic(|me| Model {
            base: ComponentBase::new(),
            me: me.clone(),
            env,
            data: RefCell::new(data),
            gate: OneShot::new(options.init),
            destroyed: Cell::new(false),
        });

        {
            let mut store = model.base.store_mut();
            store.set(CONFIG_SLOT, config);
            store.set(PARAM_SLOT, Bag::from(options.param));
        }

        tracing::debug!(endpoints = model.config_all().len(), "created model");
        model
    }

    /// Run the init hook; later calls are absorbed
    pub fn init(&self, args: &Value) -> bool {
        self.gate.run(self, args)
    }

    fn with_bag<T>(&self, slot: &str, f: impl FnOnce(&Bag) -> T) -> T {
        let store = self.base.store();
        match store.get::<Bag>(slot) {
            Some(bag) => f(bag),
            None => f(&Bag::new()),
        }
    }

    fn with_bag_mut(&self, slot: &str, f: impl FnOnce(&mut Bag)) {
        let mut store = self.base.store_mut();
        match store.get_mut::<Bag>(slot) {
            Some(bag) => f(bag),
            None => {
                let mut bag = Bag::new();
                f(&mut bag);
                store.set(slot, bag);
            }
        }
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.with_bag(CONFIG_SLOT, |bag| bag.get(key).cloned())
    }

    pub fn set_config(&self, key: &str, value: Value) {
        self.with_bag_mut(CONFIG_SLOT, |bag| bag.set(key, value));
    }

    pub fn merge_config(&self, entries: Map<String, Value>) {
        self.with_bag_mut(CONFIG_SLOT, |bag| bag.merge(entries));
    }

    pub fn config_all(&self) -> Map<String, Value> {
        self.with_bag(CONFIG_SLOT, Bag::all)
    }

    pub fn param(&self, key: &str) -> Option<Value> {
        self.with_bag(PARAM_SLOT, |bag| bag.get(key).cloned())
    }

    pub fn set_param(&self, key: &str, value: Value) {
        self.with_bag_mut(PARAM_SLOT, |bag| bag.set(key, value));
    }

    pub fn merge_param(&self, entries: Map<String, Value>) {
        self.with_bag_mut(PARAM_SLOT, |bag| bag.merge(entries));
    }

    pub fn params(&self) -> Map<String, Value> {
        self.with_bag(PARAM_SLOT, Bag::all)
    }

    /// Write `value` at a dotted path
    pub fn set_data(&self, path: &str, value: Value) -> Result<()> {
        self.data.borrow_mut().set(path, value)?;
        Ok(())
    }

    /// Deep-merge `entries` into the data tree
    pub fn merge_data(&self, entries: Map<String, Value>) {
        self.data.borrow_mut().merge(entries);
    }

    /// Replace the whole data tree
    pub fn replace_data(&self, entries: Map<String, Value>) {
        self.data.borrow_mut().replace(entries);
    }

    /// Value at a dotted path; the whole tree for an empty path
    pub fn get_data(&self, path: &str) -> Option<Value> {
        self.data.borrow().get(path)
    }

    pub fn get_data_or(&self, path: &str, default: Value) -> Value {
        self.data.borrow().get_or(path, default)
    }

    /// Endpoint for `key`: its config entry, else `key` itself
    ///
    /// A missing, null or empty entry falls back to the key. Whitespace is
    /// not trimmed, so `"  "` is sent as given.
    fn resolve_address(&self, key: &str) -> Result<String> {
        let address = match self.config(key) {
            Some(Value::String(address)) if !address.is_empty() => address,
            None | Some(Value::Null) | Some(Value::String(_)) => key.to_string(),
            Some(other) => {
                return Err(ConfigError::InvalidAddress(format!(
                    "`{}` maps to a non-string value {}",
                    key, other
                ))
                .into())
            }
        };
        ensure(!address.is_empty(), "request address must be a non-empty string")?;
        Ok(address)
    }

    /// Issue one request through the transport
    ///
    /// `extra` replaces the parameter bag for this call. Only string and
    /// number parameters are sent. A fresh correlation token goes out as the
    /// `X-Requested-Auth-Token` header and, unless the parameters already
    /// carry one, as the `token` parameter.
    ///
    /// On success every `request` listener runs before `on_success`; on
    /// failure every `error` listener runs before `on_failure`. Completions
    /// arriving after [`Component::destroy`] are dropped.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidAddress` when the config entry is not a string,
    /// `TriadError::Assertion` when the address is empty. Transport
    /// failures are never returned here.
    ///
    /// The round-trip is handed to the env's [`Scheduler`], so nothing is
    /// sent until the host turns its loop.
    pub fn request(
        &self,
        key: &str,
        extra: Option<Params>,
        on_success: Option<SuccessCallback>,
        on_failure: Option<FailureCallback>,
    ) -> Result<RequestHandle> {
        let url = self.resolve_address(key)?;
        let token = Uuid::new_v4().to_string();

        let mut params: Params = extra
            .unwrap_or_else(|| self.params())
            .into_iter()
            .filter(|(_, value)| value.is_string() || value.is_number())
            .collect();
        let has_token = match params.get(TOKEN_PARAM) {
            Some(Value::String(existing)) => !existing.is_empty(),
            Some(_) => true,
            None => false,
        };
        if !has_token {
            params.insert(TOKEN_PARAM.to_string(), Value::String(token.clone()));
        }

        let mut headers = BTreeMap::new();
        headers.insert(REQUESTED_WITH_HEADER.to_string(), "XMLHttpRequest".to_string());
        headers.insert(AUTH_TOKEN_HEADER.to_string(), token.clone());

        let settings = RequestSettings {
            method: self.env.request.method.clone(),
            url,
            params: params.clone(),
            response_type: self.env.request.response_type.clone(),
            headers,
        };
        tracing::debug!(key, url = %settings.url, token = %token, "sending request");

        let transport = Rc::clone(&self.env.transport);
        let me = self.me.clone();
        let (done_tx, done_rx) = oneshot::channel();
        self.env.scheduler.spawn(
            async move {
                let outcome = transport.send(settings).await;
                match me.upgrade() {
                    Some(model) => model.complete(outcome, params, on_success, on_failure),
                    None => tracing::debug!(token = %token, "model dropped before completion"),
                }
                // the caller may have dropped its handle
                let _ = done_tx.send(());
            }
            .boxed_local(),
        );
        Ok(RequestHandle { done: done_rx })
    }

    fn complete(
        &self,
        outcome: std::result::Result<Response, TransportFailure>,
        params: Params,
        on_success: Option<SuccessCallback>,
        on_failure: Option<FailureCallback>,
    ) {
        if self.destroyed.get() {
            tracing::debug!("suppressing completion for destroyed model");
            return;
        }

        match outcome {
            Ok(response) => {
                let completion = Completion {
                    result: response.result,
                    params,
                    raw: response.raw,
                };
                self.notify("request", &Signal::Request(completion.clone()));
                if let Some(callback) = on_success {
                    callback(self, &completion);
                }
            }
            Err(failure) => {
                let listeners = self.notify("error", &Signal::Error(failure.clone()));
                match on_failure {
                    Some(callback) => callback(self, &failure),
                    None if listeners == 0 => {
                        tracing::warn!(status = failure.status, status_text = %failure.status_text, "request failed with nobody listening");
                    }
                    None => {}
                }
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

impl Component for Model {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn this(&self) -> Weak<Self> {
        self.me.clone()
    }

    fn destroy(&self) {
        self.destroyed.set(true);
        let removed = self.unbind(Unbind::All);
        tracing::info!(listeners = removed, "model destroyed");
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("data", &*self.data.borrow())
            .field("destroyed", &self.destroyed.get())
            .field("base", &self.base)
            .finish()
    }
}
