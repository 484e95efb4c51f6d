//! triad-demo - Run a login view/model/action triad against an in-memory page

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use libtriad::dom::memory::MemoryDom;
use libtriad::dom::{DomEvent, Selection};
use libtriad::factory::{method, ComponentClass, Instance};
use libtriad::logging::{LogFormat, LoggingConfig};
use libtriad::model::RequestHandle;
use libtriad::runtime::{LocalScheduler, Scheduler};
use libtriad::transport::mock::MockTransport;
use libtriad::{
    Action, ActionOptions, Component, Config, EventMap, Events, Model, ModelEnv, ModelOptions, Signal, View,
    ViewEnv, ViewOptions,
};
use serde_json::{json, Map, Value};
use tokio::task::LocalSet;

const LOGIN_ENDPOINT: &str = "/api/login";

const TEMPLATE: &str = "\
<% target: welcome %><p class=\"hello\">Welcome back, ${name}</p>\
<% target: failure %><p class=\"oops\">Login failed: ${status} ${reason}</p>";

#[derive(Parser, Debug)]
#[command(name = "triad-demo")]
#[command(version, about = "Drive a login triad through a scripted session")]
#[command(long_about = r#"Build a login form in an in-memory document, wire a view, model and
action to it, then tap the submit button and print what the view rendered.

EXAMPLES:
    # Successful login
    triad-demo --user ada

    # Simulate a rejected login
    triad-demo --user eve --fail 403

    # Endpoints from a config file
    triad-demo --config ./triad.toml

    # JSON output for scripting
    triad-demo --format json | jq '.activity'
"#)]
struct Args {
    /// User name typed into the form
    #[arg(short, long, default_value = "ada")]
    user: String,

    /// Answer the login request with this HTTP status instead of success
    #[arg(long, value_name = "STATUS")]
    fail: Option<u16>,

    /// Simulated network latency in milliseconds
    #[arg(long, default_value = "0", value_name = "MS")]
    latency: u64,

    /// Path to a config file (defaults to TRIAD_CONFIG or the XDG location)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Log output format
    #[arg(long, default_value = "text", env = "TRIAD_LOG_FORMAT")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// What the session produced
struct Session {
    status_html: String,
    activity: Vec<String>,
    requests: Vec<Value>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    LoggingConfig::new(args.log_format, "warn".to_string(), args.verbose).init();

    let local = LocalSet::new();
    if let Err(e) = local.run_until(run(args)).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let session = login_session(&args, config).await?;

    match args.format.as_str() {
        "json" => {
            let report = json!({
                "status": session.status_html,
                "activity": session.activity,
                "requests": session.requests,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("{}", session.status_html);
            println!();
            for line in &session.activity {
                println!("  - {}", line);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "no config file, using defaults");
            Config::default_config()
        }),
    };
    Ok(config)
}

/// Dynamically defined component collecting activity lines
fn audit_log() -> Result<Rc<Instance>> {
    let class = ComponentClass::define(
        "AuditLog",
        vec![
            (
                "record",
                method(|me: &Instance, args: &[Value]| {
                    let mut lines = me.malloc("lines").unwrap_or_else(|| json!([]));
                    if let Value::Array(items) = &mut lines {
                        items.extend(args.iter().cloned());
                    }
                    me.malloc_set("lines", lines);
                    Ok(Value::Null)
                }),
            ),
            (
                "lines",
                method(|me: &Instance, _: &[Value]| Ok(me.malloc("lines").unwrap_or_else(|| json!([])))),
            ),
        ],
    )?;
    Ok(class.construct(&[])?)
}

async fn login_session(args: &Args, mut config: Config) -> Result<Session> {
    let login_url = config
        .endpoints
        .entry("login".to_string())
        .or_insert_with(|| LOGIN_ENDPOINT.to_string())
        .clone();

    let dom = MemoryDom::new();
    let form = dom
        .append(dom.root(), "form#login")
        .context("Failed to build login form")?;
    for element in ["input[name=user]", "button#submit.btn", "div.status"] {
        dom.append(form, element)
            .with_context(|| format!("Failed to append {}", element))?;
    }

    let transport = Rc::new(MockTransport::new().with_delay(Duration::from_millis(args.latency)));
    match args.fail {
        Some(status) => transport.fail(&login_url, status, status_text(status)),
        None => transport.reply_json(&login_url, json!({"name": args.user, "session": "demo"})),
    }

    let audit = audit_log()?;
    let scheduler: Rc<dyn Scheduler> = Rc::new(LocalScheduler);

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
        ViewEnv::new(Rc::new(dom.clone()), Rc::clone(&scheduler)).with_config(config.clone()),
    )?;

    let model = Model::create(
        ModelOptions::default(),
        ModelEnv::new(transport.clone(), scheduler).with_config(&config),
    );

    let pending: Rc<RefCell<Option<RequestHandle>>> = Rc::new(RefCell::new(None));

    let submit_audit = Rc::clone(&audit);
    let submit_pending = Rc::clone(&pending);
    let success_audit = Rc::clone(&audit);
    let error_audit = Rc::clone(&audit);
    let action = Action::create(
        ActionOptions::new(view, model)
            .relay("view:submit", move |action: &Action, signal: &Signal| {
                let mut params = Map::new();
                if let Some(user) = signal.args().first() {
                    params.insert("user".to_string(), user.clone());
                }
                let user = params.get("user").cloned().unwrap_or(Value::Null);
                record(&submit_audit, format!("submit user={}", user));
                match action.model().request("login", Some(params), None, None) {
                    Ok(handle) => *submit_pending.borrow_mut() = Some(handle),
                    Err(e) => record(&submit_audit, format!("request rejected: {}", e)),
                }
            })
            .relay("model:request", move |action: &Action, signal: &Signal| {
                let Signal::Request(completion) = signal else {
                    return;
                };
                record(&success_audit, format!("request ok token={}", token_of(completion.params.get("token"))));
                action
                    .model()
                    .merge_data(completion.result.as_object().cloned().unwrap_or_default());
                let data = json!({"name": action.model().get_data_or("name", json!("stranger"))});
                if let Err(e) = action.view().render_into("welcome", &data, ".status") {
                    tracing::error!(error = %e, "failed to render welcome");
                }
            })
            .relay("model:error", move |action: &Action, signal: &Signal| {
                let Signal::Error(failure) = signal else {
                    return;
                };
                record(&error_audit, format!("request failed: {}", failure));
                let data = json!({"status": failure.status, "reason": failure.status_text});
                if let Err(e) = action.view().render_into("failure", &data, ".status") {
                    tracing::error!(error = %e, "failed to render failure");
                }
            }),
    )?;

    action.init(&Value::Null);
    action.view().notify("ready", &Signal::Ready);
    record(&audit, format!("view ready with {} binding(s)", action.view().binding_count()));

    let fired = dom.fire("#submit", "tap", json!(args.user));
    tracing::debug!(fired, "tapped submit");

    let handle = pending.borrow_mut().take();
    if let Some(handle) = handle {
        handle.await.context("Login request task failed")?;
    }

    let status_html = dom.html(".status").unwrap_or_default();
    action.destroy();
    record(&audit, "triad destroyed".to_string());

    let activity = match audit.call("lines", &[])? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let requests = transport
        .requests()
        .into_iter()
        .map(|request| serde_json::to_value(request).unwrap_or(Value::Null))
        .collect();

    Ok(Session {
        status_html,
        activity,
        requests,
    })
}

fn record(audit: &Instance, line: String) {
    if let Err(e) = audit.call("record", &[Value::String(line)]) {
        tracing::warn!(error = %e, "failed to record activity");
    }
}

fn token_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(token)) => token.chars().take(8).collect(),
        _ => "-".to_string(),
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}
