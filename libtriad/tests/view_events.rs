//! DOM event wiring through views, driven by the in-memory document

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use libtriad::dom::memory::{MemoryDom, NodeId};
use libtriad::dom::{DomEvent, DomHost, ElementSet, Selection};
use libtriad::runtime::TurnQueue;
use libtriad::{
    Component, ConfigError, EventMap, Events, Signal, TriadError, View, ViewEnv, ViewOptions,
};
use serde_json::json;

struct Page {
    dom: MemoryDom,
    list: NodeId,
    queue: Rc<TurnQueue>,
}

impl Page {
    fn new() -> Self {
        let dom = MemoryDom::new();
        let app = dom.append(dom.root(), "div#app").unwrap();
        let list = dom.append(app, "ul.list").unwrap();
        dom.append(list, "li#first.item").unwrap();
        dom.append(list, "li#second.item").unwrap();
        dom.append(app, "button#go.btn").unwrap();
        Self {
            dom,
            list,
            queue: Rc::new(TurnQueue::new()),
        }
    }

    fn env(&self) -> ViewEnv {
        ViewEnv::new(Rc::new(self.dom.clone()), self.queue.clone())
    }

    fn view(&self, events: EventMap<View>) -> Result<Rc<View>, TriadError> {
        View::create(
            ViewOptions {
                template: "<% target: row %><li>${name}</li>".to_string(),
                main: Some("#app".to_string()),
                events,
                ..ViewOptions::default()
            },
            self.env(),
        )
    }
}

#[test]
fn test_once_delegated_handler_retires_after_first_true() {
    let page = Page::new();
    let answers = Rc::new(RefCell::new(VecDeque::from([false, false, true])));
    let calls = Rc::new(Cell::new(0));

    let answers_clone = Rc::clone(&answers);
    let calls_clone = Rc::clone(&calls);
    let view = page
        .view(EventMap::new().on(
            "@![tap] .item",
            move |_: &View, _: &DomEvent, _: &Selection| {
                calls_clone.set(calls_clone.get() + 1);
                answers_clone.borrow_mut().pop_front().unwrap_or(false)
            },
        ))
        .unwrap();
    view.notify("ready", &Signal::Ready);

    for _ in 0..4 {
        page.dom.fire("#first", "tap", json!(null));
    }

    assert_eq!(calls.get(), 3);
    assert!(answers.borrow().is_empty());
}

#[test]
fn test_direct_binding_then_destroy_leaves_nothing_attached() {
    let page = Page::new();
    let taps = Rc::new(Cell::new(0));
    let taps_clone = Rc::clone(&taps);
    let view = page
        .view(EventMap::new().on("[tap] .btn", move |_: &View, _: &DomEvent, _: &Selection| {
            taps_clone.set(taps_clone.get() + 1);
            true
        }))
        .unwrap();

    view.notify("ready", &Signal::Ready);
    assert_eq!(page.dom.listener_count(), 1);
    page.dom.fire(".btn", "tap", json!(null));

    view.destroy();
    assert_eq!(page.dom.listener_count(), 0);
    page.dom.fire(".btn", "tap", json!(null));
    assert_eq!(taps.get(), 1);
}

#[test]
fn test_delegated_handler_sees_matching_element() {
    let page = Page::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let view = page
        .view(EventMap::new().on(
            "@[tap, press] li.item",
            move |_: &View, event: &DomEvent, this: &Selection| {
                let id = this.attr("id").unwrap_or_default();
                seen_clone
                    .borrow_mut()
                    .push(format!("{}:{}", event.event_type, id));
                true
            },
        ))
        .unwrap();
    view.notify("ready", &Signal::Ready);

    page.dom.fire("#second", "tap", json!(null));
    page.dom.fire("#first", "press", json!(null));
    page.dom.fire(".btn", "tap", json!(null));

    assert_eq!(*seen.borrow(), vec!["tap:second", "press:first"]);
}

#[test]
fn test_delegation_is_scoped_to_view_root() {
    let page = Page::new();
    let calls = Rc::new(Cell::new(0));
    let calls_clone = Rc::clone(&calls);
    let view = page
        .view(EventMap::new().on("@[tap] .item", move |_: &View, _: &DomEvent, _: &Selection| {
            calls_clone.set(calls_clone.get() + 1);
            true
        }))
        .unwrap();
    view.notify("ready", &Signal::Ready);

    let list = page.dom.append(page.dom.root(), "ul#outside").unwrap();
    page.dom.append(list, "li#stray.item").unwrap();
    // outside the #app root
    page.dom.fire("#stray", "tap", json!(null));
    assert_eq!(calls.get(), 0);

    // appended inside the root after ready
    page.dom.append(page.list, "li#late.item").unwrap();
    assert_eq!(page.dom.select(".item").len(), 4);
    page.dom.fire("#late", "tap", json!(null));
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_malformed_key_attaches_nothing() {
    let page = Page::new();
    let result = page.view(
        EventMap::new()
            .on("[tap] .btn", |_: &View, _: &DomEvent, _: &Selection| true)
            .on("@@[tap] .item", |_: &View, _: &DomEvent, _: &Selection| true),
    );

    assert!(matches!(
        result,
        Err(TriadError::Config(ConfigError::BadEventKey(_)))
    ));
    assert_eq!(page.dom.listener_count(), 0);
}

#[test]
fn test_ready_listener_is_gone_after_next_turn() {
    let page = Page::new();
    let view = page.view(EventMap::new()).unwrap();
    let seen = Rc::new(Cell::new(0));
    let seen_clone = Rc::clone(&seen);
    view.bind("ready", move |_, _| seen_clone.set(seen_clone.get() + 1));

    view.notify("ready", &Signal::Ready);
    assert!(view.is_ready());
    assert_eq!(page.queue.run_pending(), 1);

    assert_eq!(view.notify("ready", &Signal::Ready), 1);
    assert_eq!(seen.get(), 2);
    assert_eq!(view.base().listener_count("ready"), 1);
}
