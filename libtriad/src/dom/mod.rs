//! DOM collaborator
//!
//! Views never touch a document directly. They go through a [`DomHost`],
//! which turns selectors into [`ElementSet`]s that can attach direct or
//! delegated handlers and replace their contents. A browser binding would
//! implement these traits over real nodes; [`memory::MemoryDom`] implements
//! them over an in-memory tree for tests and the demo.

use std::rc::Rc;

use serde_json::Value;

pub mod memory;

/// A dispatched DOM event
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub event_type: String,
    /// Host-defined payload (pointer position, key, form values, ...)
    pub detail: Value,
}

impl DomEvent {
    pub fn new(event_type: impl Into<String>, detail: Value) -> Self {
        Self {
            event_type: event_type.into(),
            detail,
        }
    }
}

/// Shared handle to a set of elements
pub type Selection = Rc<dyn ElementSet>;

/// Native-level handler: the event and the element it fired on
///
/// Identity is the `Rc` pointer, which is what `off`/`undelegate` match on.
pub type DomHandler = Rc<dyn Fn(&DomEvent, &Selection)>;

/// Entry point of the DOM collaborator
pub trait DomHost {
    /// Every element matching `selector`, in document order
    fn select(&self, selector: &str) -> Selection;
}

/// Zero or more elements
pub trait ElementSet {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach `handler` directly to every element in the set
    fn on(&self, event_type: &str, handler: DomHandler);

    /// Remove a direct handler previously attached with `on`
    fn off(&self, event_type: &str, handler: &DomHandler);

    /// Attach `handler` to the set, firing for descendants matching `selector`
    fn delegate(&self, selector: &str, event_type: &str, handler: DomHandler);

    fn undelegate(&self, selector: &str, event_type: &str, handler: &DomHandler);

    /// Replace the contents of every element in the set
    fn set_html(&self, html: &str);

    /// Contents of the first element, empty for an empty set
    fn html(&self) -> String;

    /// Attribute of the first element (`id` and `class` included)
    fn attr(&self, name: &str) -> Option<String>;
}
