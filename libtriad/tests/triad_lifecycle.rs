//! A login triad wired end to end: DOM tap, view event, action relay,
//! model request, rendered result

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use libtriad::dom::memory::MemoryDom;
use libtriad::dom::{DomEvent, Selection};
use libtriad::model::RequestHandle;
use libtriad::runtime::LocalScheduler;
use libtriad::transport::mock::MockTransport;
use libtriad::{
    Action, ActionOptions, Component, Config, EventMap, Events, Model, ModelEnv, ModelOptions,
    Signal, View, ViewEnv, ViewOptions,
};
use serde_json::{json, Map, Value};
use tokio::task::LocalSet;

const TEMPLATE: &str = "\
<% target: welcome %><p class=\"hello\">Welcome ${name}</p>\
<% target: failure %><p class=\"oops\">${status} ${reason}</p>";

struct Login {
    dom: MemoryDom,
    transport: Rc<MockTransport>,
    action: Rc<Action>,
    pending: Rc<RefCell<Option<RequestHandle>>>,
}

fn login() -> Result<Login> {
    let dom = MemoryDom::new();
    let app = dom.append(dom.root(), "form#login").unwrap();
    dom.append(app, "input[name=user]").unwrap();
    dom.append(app, "button#submit.btn").unwrap();
    dom.append(app, "div.status").unwrap();

    let config = Config::from_toml_str("[endpoints]\nlogin = \"/api/login\"\n")?;
    let transport = Rc::new(MockTransport::new());

    let view = View::create(
        ViewOptions {
            template: TEMPLATE.to_string(),
            main: Some("#login".to_string()),
            events: EventMap::new().on(
                "[tap] .btn",
                |view: &View, event: &DomEvent, _: &Selection| {
                    view.notify("submit", &Signal::emit([event.detail.clone()]));
                    true
                },
            ),
            ..ViewOptions::default()
        },
        ViewEnv::new(Rc::new(dom.clone()), Rc::new(LocalScheduler)).with_config(config.clone()),
    )?;

    let model = Model::create(
        ModelOptions::default(),
        ModelEnv::new(transport.clone(), Rc::new(LocalScheduler)).with_config(&config),
    );

    let pending: Rc<RefCell<Option<RequestHandle>>> = Rc::new(RefCell::new(None));
    let pending_clone = Rc::clone(&pending);
    let action = Action::create(
        ActionOptions::new(view, model)
            .relay("view:submit", move |action: &Action, signal: &Signal| {
                let mut params = Map::new();
                if let Some(Value::String(user)) = signal.args().first() {
                    params.insert("user".to_string(), json!(user));
                }
                match action.model().request("login", Some(params), None, None) {
                    Ok(handle) => *pending_clone.borrow_mut() = Some(handle),
                    Err(e) => panic!("request should resolve: {}", e),
                }
            })
            .relay("model:request", |action: &Action, signal: &Signal| {
                if let Signal::Request(completion) = signal {
                    action
                        .model()
                        .merge_data(completion.result.as_object().cloned().unwrap_or_default());
                    let data = json!({"name": action.model().get_data_or("name", json!("?"))});
                    action.view().render_into("welcome", &data, ".status").unwrap();
                }
            })
            .relay("model:error", |action: &Action, signal: &Signal| {
                if let Signal::Error(failure) = signal {
                    let data = json!({"status": failure.status, "reason": failure.status_text});
                    action.view().render_into("failure", &data, ".status").unwrap();
                }
            }),
    )?;

    Ok(Login {
        dom,
        transport,
        action,
        pending,
    })
}

impl Login {
    async fn submit(&self, user: &str) -> Result<()> {
        self.dom.fire("#submit", "tap", json!(user));
        let handle = self.pending.borrow_mut().take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_successful_login_renders_welcome() -> Result<()> {
    let local = LocalSet::new();
    local
        .run_until(async {
            let login = login()?;
            login
                .transport
                .reply_json("/api/login", json!({"name": "Ada <admin>"}));

            assert!(login.action.init(&Value::Null));
            login.action.view().notify("ready", &Signal::Ready);
            login.submit("ada").await?;

            assert_eq!(
                login.dom.html(".status").as_deref(),
                Some("<p class=\"hello\">Welcome Ada &lt;admin&gt;</p>")
            );
            let sent = login.transport.last_request().expect("request sent");
            assert_eq!(sent.url, "/api/login");
            assert_eq!(sent.params.get("user"), Some(&json!("ada")));
            Ok::<_, anyhow::Error>(())
        })
        .await
}

#[tokio::test]
async fn test_failed_login_renders_status() -> Result<()> {
    let local = LocalSet::new();
    local
        .run_until(async {
            let login = login()?;
            login.transport.fail("/api/login", 403, "Forbidden");

            login.action.view().notify("ready", &Signal::Ready);
            login.submit("eve").await?;

            assert_eq!(
                login.dom.html(".status").as_deref(),
                Some("<p class=\"oops\">403 Forbidden</p>")
            );
            Ok::<_, anyhow::Error>(())
        })
        .await
}

#[tokio::test]
async fn test_ready_listener_removed_on_next_turn() -> Result<()> {
    let local = LocalSet::new();
    local
        .run_until(async {
            let login = login()?;
            let view = Rc::clone(login.action.view());

            view.notify("ready", &Signal::Ready);
            assert_eq!(view.base().listener_count("ready"), 1);

            tokio::task::yield_now().await;
            assert_eq!(view.base().listener_count("ready"), 0);
            assert!(view.is_ready());
            Ok::<_, anyhow::Error>(())
        })
        .await
}

#[tokio::test]
async fn test_destroy_tears_down_whole_triad() -> Result<()> {
    let local = LocalSet::new();
    local
        .run_until(async {
            let login = login()?;
            login.transport.reply_json("/api/login", json!({"name": "Ada"}));
            login.action.view().notify("ready", &Signal::Ready);
            assert_eq!(login.dom.listener_count(), 1);

            login.action.destroy();

            assert_eq!(login.dom.listener_count(), 0);
            assert_eq!(login.action.base().total_listeners(), 0);
            assert_eq!(login.action.view().base().total_listeners(), 0);
            assert_eq!(login.action.model().base().total_listeners(), 0);

            login.submit("ada").await?;
            assert_eq!(login.transport.call_count(), 0);
            assert_eq!(login.dom.html(".status").as_deref(), Some(""));
            Ok::<_, anyhow::Error>(())
        })
        .await
}
