//! Triad - a micro MVC framework for event-driven UIs
//!
//! This library provides components with private state and a per-instance
//! event bus, and composes them into view/model/action triads with a
//! deterministic lifecycle.

pub mod action;
pub mod bag;
pub mod binder;
pub mod bus;
pub mod component;
pub mod config;
pub mod data;
pub mod dom;
pub mod error;
pub mod factory;
pub mod logging;
pub mod model;
pub mod runtime;
pub mod store;
pub mod template;
pub mod transport;
pub mod view;

// Re-export commonly used types
pub use action::{Action, ActionOptions};
pub use binder::{DomBinding, EventMap};
pub use bus::{EventBus, Listener, Token, Unbind};
pub use component::{Component, ComponentBase, Events, Signal};
pub use config::Config;
pub use error::{ConfigError, Result, TriadError};
pub use model::{Model, ModelEnv, ModelOptions};
pub use transport::{Completion, Transport, TransportFailure};
pub use view::{View, ViewEnv, ViewOptions};
