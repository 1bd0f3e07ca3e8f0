use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nudge::config::Config;
use nudge::kernel::notification::{Delivery, Notification};
use nudge::orchestrator::{AlertSink, Orchestrator, UiEvent, Wiring};
use nudge::services::feed::client::FeedClient;
use nudge::services::feed::socket::WsTransport;
use nudge::services::push::{ConfiguredPushPlatform, SubscriptionManager};
use nudge::store::{FeedbackPrefs, LocalStore};

const HELP: &str = "commands: list | respond <id> <action#|body|\"raw body\"> | topic <topic> [reply-topic] \
| sound on|off | wake | clear | subscribe | unsubscribe | quit";

/// Terminal bell; vibration has no terminal equivalent.
struct TerminalAlerts;

impl AlertSink for TerminalAlerts {
    fn alert(&self, _notification: &Notification, prefs: &FeedbackPrefs) {
        if prefs.sound {
            print!("\x07");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Setup Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    // 2. Config + durable state
    let config = Config::load().context("loading config")?;
    let store = Arc::new(
        LocalStore::open(&config.state_path, config.history_cap, config.connection.seen_cap)
            .with_context(|| format!("opening state file {}", config.state_path.display()))?,
    );
    let seeded = store.settings();
    if seeded.topic.is_none() || seeded.reply_topic.is_none() {
        store.update_settings(|s| {
            if s.topic.is_none() {
                s.topic = config.topic.clone();
            }
            if s.reply_topic.is_none() {
                s.reply_topic = config.reply_topic.clone();
            }
        })?;
    }

    // 3. Services
    let client = Arc::new(FeedClient::new(&config.server, config.request_timeout()));
    let push = config.push.clone().map(|push| {
        SubscriptionManager::new(Arc::new(ConfiguredPushPlatform::new(Some(push))), client.clone())
    });

    let (ui_tx, mut ui_rx) = mpsc::channel(64);
    let orchestrator = Arc::new(Orchestrator::new(
        Wiring {
            store: store.clone(),
            transport: Arc::new(WsTransport::new(&config.server)),
            history: client.clone(),
            replies: client.clone(),
            push,
            alerts: Arc::new(TerminalAlerts),
            connection: config.connection.clone(),
            reply_retry_delay: config.reply_retry_delay(),
        },
        ui_tx,
    ));

    tracing::info!(server = %config.server, "nudge starting");
    if !orchestrator.start() {
        println!("No topic yet. Set one with: topic <topic> [reply-topic]");
    }

    // 4. Presentation
    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match event {
                UiEvent::Notification(n) => print_notification(&n),
                UiEvent::Answered(n) => {
                    let how = match n.delivery() {
                        Some(Delivery::Failed) => " (not delivered)",
                        _ => "",
                    };
                    println!("✓ {} answered with {}{}", n.id, n.answered_with().unwrap_or("?"), how);
                }
                UiEvent::Status(state) => println!("-- feed {:?}", state),
            }
        }
    });

    // 5. Wake signals
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let waker = orchestrator.clone();
        let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                waker.wake();
            }
        });
    }

    // 6. Console input
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !handle_command(&orchestrator, line).await {
            break;
        }
    }

    orchestrator.stop();
    Ok(())
}

async fn handle_command(orchestrator: &Orchestrator, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let first = parts.next();
    let rest = parts.next();

    match (command, first, rest) {
        ("quit", _, _) | ("exit", _, _) => return false,
        ("list", _, _) => {
            for n in orchestrator.history().iter().rev() {
                print_notification(n);
            }
        }
        ("respond", Some(id), Some(choice)) => {
            let result = match parse_choice(choice) {
                Ok(Choice::Action(index)) => orchestrator.respond_with_action(id, index).await,
                Ok(Choice::Body(body)) => orchestrator.respond(id, body).await,
                Err(e) => {
                    println!("! {e}");
                    return true;
                }
            };
            if let Err(e) = result {
                println!("! {e}");
            }
        }
        ("topic", Some(topic), reply) => {
            if let Err(e) = orchestrator.set_topics(topic, reply.map(str::trim)).await {
                println!("! {e}");
            }
        }
        ("sound", Some(flag), _) => {
            let mut feedback = orchestrator.settings().feedback;
            feedback.sound = flag == "on";
            if let Err(e) = orchestrator.set_feedback(feedback) {
                println!("! {e}");
            }
        }
        ("wake", _, _) => orchestrator.wake(),
        ("clear", _, _) => {
            if let Err(e) = orchestrator.clear_history() {
                println!("! {e}");
            }
        }
        ("subscribe", _, _) => match orchestrator.subscribe_push().await {
            Ok(handle) => println!("push registered for {:?}", handle.topics),
            Err(e) => println!("! {e}"),
        },
        ("unsubscribe", _, _) => {
            let teardown = orchestrator.unsubscribe_push().await;
            println!("push removed ({teardown:?})");
        }
        _ => println!("{HELP}"),
    }
    true
}

fn print_notification(n: &Notification) {
    let when = Local
        .timestamp_opt(n.time, 0)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let status = if n.answered() {
        " [answered]"
    } else if n.is_actionable() {
        " [awaiting answer]"
    } else {
        ""
    };
    println!("[{when}] {} <{}> {}{}", n.id, n.kind, n.title, status);
    println!("    {}", plain(&n.message).replace('\n', "\n    "));
    for (i, action) in n.actions.iter().enumerate() {
        println!("    {}) {}", i + 1, action.label);
    }
}

#[derive(Debug, PartialEq)]
enum Choice<'a> {
    /// Zero-based index into the notification's actions.
    Action(usize),
    Body(&'a str),
}

/// `2` picks the second action, `"42"` sends 42 verbatim, anything else is a body.
fn parse_choice(choice: &str) -> Result<Choice<'_>, String> {
    let choice = choice.trim();
    if let Some(raw) = choice.strip_prefix('"').and_then(|c| c.strip_suffix('"')) {
        return Ok(Choice::Body(raw));
    }
    match choice.parse::<usize>() {
        Ok(0) => Err("actions are numbered from 1".to_string()),
        Ok(n) => Ok(Choice::Action(n - 1)),
        Err(_) => Ok(Choice::Body(choice)),
    }
}

/// Terminal rendering of the lightweight markup producers use.
fn plain(message: &str) -> String {
    message.replace("\\n", "\n").replace("**", "").replace('`', "")
}
