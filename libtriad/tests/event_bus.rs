//! Event bus behavior as seen through components

use std::cell::RefCell;
use std::rc::Rc;

use libtriad::bus::{listener, EventBus, Unbind};
use libtriad::factory::{method, ComponentClass, Method};
use libtriad::{Events, Signal};
use serde_json::{json, Value};

fn log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn test_unbind_all_after_arbitrary_history() {
    let bus: EventBus<Value> = EventBus::new();
    let shared = listener(|_: &Value| {});

    let first = bus.bind("a", Rc::clone(&shared));
    bus.bind("b", Rc::clone(&shared));
    bus.bind("b", listener(|_: &Value| {}));
    bus.unbind(Unbind::Token(first));
    bus.bind("c", listener(|_: &Value| {}));
    bus.unbind(Unbind::Type("c"));
    bus.bind("a", listener(|_: &Value| {}));

    bus.unbind(Unbind::All);

    for event_type in ["a", "b", "c", "d"] {
        assert_eq!(bus.notify(event_type, &json!(null)), 0);
    }
    assert!(bus.is_empty());
    assert!(bus.event_types().is_empty());
}

#[test]
fn test_tokens_strictly_increase_across_types_and_clears() {
    let bus: EventBus<Value> = EventBus::new();
    let mut seen = Vec::new();

    for round in 0..3 {
        for event_type in ["x", "y"] {
            seen.push(bus.bind(event_type, listener(|_: &Value| {})));
        }
        if round == 1 {
            bus.unbind(Unbind::All);
        }
    }

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(seen.first().map(|t| t.value()), Some(1));
}

#[test]
fn test_token_removes_one_listener_reference_removes_all() {
    let calls = log();
    let bus: EventBus<Value> = EventBus::new();

    let calls_clone = Rc::clone(&calls);
    let shared = listener(move |v: &Value| calls_clone.borrow_mut().push(v.to_string()));

    let token = bus.bind("a", Rc::clone(&shared));
    bus.bind("a", Rc::clone(&shared));
    bus.bind("b", Rc::clone(&shared));

    assert_eq!(bus.unbind(Unbind::Token(token)), 1);
    assert_eq!(bus.listener_count("a"), 1);

    assert_eq!(bus.unbind(Unbind::Listener(&shared)), 2);
    assert_eq!(bus.total_listeners(), 0);

    bus.notify("a", &json!(1));
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_listener_added_during_dispatch_waits_for_next_notify() {
    let calls = log();
    let bus: Rc<EventBus<Value>> = Rc::new(EventBus::new());

    let bus_clone = Rc::clone(&bus);
    let calls_clone = Rc::clone(&calls);
    bus.bind(
        "tick",
        listener(move |_: &Value| {
            calls_clone.borrow_mut().push("outer".to_string());
            let inner_calls = Rc::clone(&calls_clone);
            bus_clone.bind(
                "tick",
                listener(move |_: &Value| inner_calls.borrow_mut().push("inner".to_string())),
            );
        }),
    );

    assert_eq!(bus.notify("tick", &json!(null)), 1);
    assert_eq!(*calls.borrow(), vec!["outer"]);

    assert_eq!(bus.notify("tick", &json!(null)), 2);
    assert_eq!(*calls.borrow(), vec!["outer", "outer", "inner"]);
}

#[test]
fn test_dynamic_class_uses_same_bus_contract() {
    let class = ComponentClass::define(
        "Clock",
        vec![(
            "tick",
            method(|me, args| {
                let fired = me.notify("tick", &Signal::emit(args.to_vec()));
                Ok(json!(fired))
            }),
        )],
    )
    .unwrap();
    let clock = class.construct(&[]).unwrap();

    let calls = log();
    let calls_clone = Rc::clone(&calls);
    let token = clock.bind("tick", move |_, signal| {
        calls_clone.borrow_mut().push(signal.args()[0].to_string());
    });

    assert_eq!(clock.call("tick", &[json!(1)]).unwrap(), json!(1));
    clock.unbind(Unbind::Token(token));
    assert_eq!(clock.call("tick", &[json!(2)]).unwrap(), json!(0));
    assert_eq!(*calls.borrow(), vec!["1"]);
}

#[test]
fn test_component_keeps_working_after_listener_panics() {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let class = ComponentClass::define("Form", Vec::<(&str, Method)>::new()).unwrap();
    let form = class.construct(&[]).unwrap();

    let calls = log();
    let faulty = form.bind("submit", |_, _| panic!("handler failed"));
    let calls_clone = Rc::clone(&calls);
    form.bind("submit", move |_, _| calls_clone.borrow_mut().push("saved".to_string()));

    let outcome = catch_unwind(AssertUnwindSafe(|| form.notify("submit", &Signal::Ready)));
    assert!(outcome.is_err());
    assert!(calls.borrow().is_empty());

    assert_eq!(form.unbind(Unbind::Token(faulty)), 1);
    assert_eq!(form.notify("submit", &Signal::Ready), 1);
    assert_eq!(*calls.borrow(), vec!["saved"]);
}
