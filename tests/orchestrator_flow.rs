mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::*;
use nudge::error::RespondError;
use nudge::kernel::event::ConnectionState;
use nudge::kernel::notification::{Delivery, Notification, NotificationKind};
use nudge::orchestrator::{AlertSink, Orchestrator, UiEvent, Wiring};
use nudge::store::{FeedbackPrefs, LocalStore};

#[derive(Default)]
struct CountingAlerts {
    rung: AtomicUsize,
}

impl AlertSink for CountingAlerts {
    fn alert(&self, _notification: &Notification, prefs: &FeedbackPrefs) {
        if prefs.sound {
            self.rung.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Rig {
    orchestrator: Orchestrator,
    ui: mpsc::Receiver<UiEvent>,
    probe: TransportProbe,
    replies: Arc<FakeReplies>,
    alerts: Arc<CountingAlerts>,
}

fn rig(store: Arc<LocalStore>, script: Vec<Script>, reply_failures: usize) -> Rig {
    let (transport, probe) = FakeTransport::new(script);
    let replies = FakeReplies::new(reply_failures);
    let alerts = Arc::new(CountingAlerts::default());
    let (ui_tx, ui) = mpsc::channel(256);
    let orchestrator = Orchestrator::new(
        Wiring {
            store,
            transport,
            history: FakeHistory::empty(),
            replies: replies.clone(),
            push: None,
            alerts: alerts.clone(),
            connection: fast_config(),
            reply_retry_delay: Duration::from_secs(2),
        },
        ui_tx,
    );
    Rig {
        orchestrator,
        ui,
        probe,
        replies,
        alerts,
    }
}

fn configured_store(reply_topic: Option<&str>) -> Arc<LocalStore> {
    let store = Arc::new(LocalStore::in_memory(50, 100));
    store
        .update_settings(|s| {
            s.topic = Some("agent".into());
            s.reply_topic = reply_topic.map(String::from);
        })
        .unwrap();
    store
}

async fn next_ui_notification(ui: &mut mpsc::Receiver<UiEvent>) -> Notification {
    loop {
        if let UiEvent::Notification(n) = ui.recv().await.expect("ui channel closed") {
            return n;
        }
    }
}

async fn next_answered(ui: &mut mpsc::Receiver<UiEvent>) -> Notification {
    loop {
        if let UiEvent::Answered(n) = ui.recv().await.expect("ui channel closed") {
            return n;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_permission_request_round_trip() {
    let mut rig = rig(configured_store(Some("agent-reply")), vec![Script::Accept], 0);
    assert!(rig.orchestrator.start());

    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["lock"], &[("Allow", "OK_42"), ("Deny", "NOK_42")]));

    let shown = next_ui_notification(&mut rig.ui).await;
    assert_eq!(shown.kind, NotificationKind::Permission);
    assert_eq!(shown.correlation_id.as_deref(), Some("42"));
    assert!(!shown.answered());
    assert_eq!(rig.alerts.rung.load(Ordering::SeqCst), 1);
    assert_eq!(rig.orchestrator.state(), ConnectionState::Connected);

    let answered = rig.orchestrator.respond_with_action("m1", 0).await.unwrap();
    assert!(answered.answered());
    assert_eq!(answered.answered_with(), Some("OK_42"));
    assert_eq!(answered.delivery(), Some(Delivery::Delivered));
    assert_eq!(
        rig.replies.sent.lock().unwrap().as_slice(),
        &[("agent-reply".to_string(), "OK_42".to_string())]
    );

    let event = next_answered(&mut rig.ui).await;
    assert_eq!(event.id, "m1");
    assert!(rig.orchestrator.history()[0].answered());

    let again = rig.orchestrator.respond("m1", "NOK_42").await;
    assert!(matches!(again, Err(RespondError::AlreadyAnswered(_))));
    assert_eq!(rig.replies.sent.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_still_marks_answered() {
    let mut rig = rig(configured_store(Some("agent-reply")), vec![Script::Accept], 2);
    rig.orchestrator.start();

    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["question"], &[("Yes", "OK_9")]));
    next_ui_notification(&mut rig.ui).await;

    let answered = rig.orchestrator.respond("m1", "OK_9").await.unwrap();
    assert!(answered.answered());
    assert_eq!(answered.delivery(), Some(Delivery::Failed));
    // One attempt plus one retry.
    assert_eq!(rig.replies.sent.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_single_retry_recovers_publish() {
    let mut rig = rig(configured_store(Some("agent-reply")), vec![Script::Accept], 1);
    rig.orchestrator.start();

    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["point_right"], &[("A", "1_5"), ("B", "2_5")]));
    let shown = next_ui_notification(&mut rig.ui).await;
    assert_eq!(shown.kind, NotificationKind::Choice);

    let answered = rig.orchestrator.respond_with_action("m1", 1).await.unwrap();
    assert_eq!(answered.answered_with(), Some("2_5"));
    assert_eq!(answered.delivery(), Some(Delivery::Delivered));
}

#[tokio::test(start_paused = true)]
async fn test_respond_rejects_bad_requests() {
    let mut rig = rig(configured_store(None), vec![Script::Accept], 0);
    rig.orchestrator.start();

    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["lock"], &[("Allow", "OK_1")]));
    next_ui_notification(&mut rig.ui).await;

    assert!(matches!(
        rig.orchestrator.respond("nope", "OK_1").await,
        Err(RespondError::UnknownNotification(_))
    ));
    assert!(matches!(
        rig.orchestrator.respond_with_action("m1", 3).await,
        Err(RespondError::NoSuchAction { index: 3, .. })
    ));
    assert!(matches!(
        rig.orchestrator.respond("m1", "OK_1").await,
        Err(RespondError::NoReplyTopic)
    ));
    assert!(rig.replies.sent.lock().unwrap().is_empty());
    assert!(!rig.orchestrator.history()[0].answered());
}

#[tokio::test(start_paused = true)]
async fn test_start_without_topic_stays_offline() {
    let rig = rig(Arc::new(LocalStore::in_memory(10, 10)), vec![Script::Accept], 0);
    assert!(!rig.orchestrator.start());
    assert_eq!(rig.orchestrator.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_muted_feedback_skips_sound() {
    let mut rig = rig(configured_store(Some("agent-reply")), vec![Script::Accept], 0);
    rig.orchestrator
        .set_feedback(FeedbackPrefs {
            sound: false,
            vibrate: true,
        })
        .unwrap();
    rig.orchestrator.start();

    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["warning"], &[]));
    let shown = next_ui_notification(&mut rig.ui).await;
    assert_eq!(shown.kind, NotificationKind::Decision);
    assert_eq!(rig.alerts.rung.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_does_not_redeliver_known_notifications() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = Arc::new(LocalStore::open(&path, 50, 100).unwrap());
        store
            .update_settings(|s| {
                s.topic = Some("agent".into());
                s.reply_topic = Some("agent-reply".into());
            })
            .unwrap();
        let mut rig = rig(store, vec![Script::Accept], 0);
        rig.orchestrator.start();
        let link = rig.probe.links.recv().await.unwrap();
        send_text(&link, message("m1", &["lock"], &[("Allow", "OK_42")]));
        next_ui_notification(&mut rig.ui).await;
        rig.orchestrator.respond_with_action("m1", 0).await.unwrap();
        rig.orchestrator.stop();
    }

    let store = Arc::new(LocalStore::open(&path, 50, 100).unwrap());
    let reopened = store.get("m1").unwrap();
    assert!(reopened.answered());
    assert_eq!(reopened.answered_with(), Some("OK_42"));

    let mut rig = rig(store, vec![Script::Accept], 0);
    rig.orchestrator.start();
    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["lock"], &[("Allow", "OK_42")]));
    send_text(&link, message("m2", &["white_check_mark"], &[]));

    let shown = next_ui_notification(&mut rig.ui).await;
    assert_eq!(shown.id, "m2");
    assert_eq!(rig.alerts.rung.load(Ordering::SeqCst), 1);
    assert_eq!(rig.orchestrator.history().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_topic_change_reconnects() {
    let mut rig = rig(
        configured_store(Some("agent-reply")),
        vec![Script::Accept, Script::Accept],
        0,
    );
    rig.orchestrator.start();
    let _first = rig.probe.links.recv().await.unwrap();

    rig.orchestrator
        .set_topics("other", Some("other-reply"))
        .await
        .unwrap();
    let second = rig.probe.links.recv().await.unwrap();
    send_text(&second, message("n1", &["lock"], &[("Allow", "OK_3")]));
    next_ui_notification(&mut rig.ui).await;

    rig.orchestrator.respond("n1", "OK_3").await.unwrap();
    let sent = rig.replies.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![("other-reply".to_string(), "OK_3".to_string())]);
    assert_eq!(rig.orchestrator.settings().topic.as_deref(), Some("other"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_answers_publish_once() {
    let mut rig = rig(configured_store(Some("agent-reply")), vec![Script::Accept], 1);
    rig.orchestrator.start();

    let link = rig.probe.links.recv().await.unwrap();
    send_text(&link, message("m1", &["lock"], &[("Allow", "OK_42"), ("Deny", "NOK_42")]));
    next_ui_notification(&mut rig.ui).await;

    let (a, b) = tokio::join!(
        rig.orchestrator.respond("m1", "OK_42"),
        rig.orchestrator.respond("m1", "NOK_42")
    );
    let (winner, loser) = match (a, b) {
        (Ok(n), Err(e)) | (Err(e), Ok(n)) => (n, e),
        other => panic!("expected exactly one answer to win, got {other:?}"),
    };
    assert!(matches!(loser, RespondError::AlreadyAnswered(_)));

    let body = winner.answered_with().unwrap().to_string();
    let sent = rig.replies.sent.lock().unwrap().clone();
    // failed attempt plus retry, both carrying the winning body
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(topic, b)| topic == "agent-reply" && *b == body));
    assert_eq!(rig.orchestrator.history()[0].answered_with(), Some(body.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_topic_is_rejected_before_saving() {
    let rig = rig(configured_store(Some("agent-reply")), vec![Script::Accept], 0);
    rig.orchestrator.start();
    let before = rig.orchestrator.settings();

    assert!(rig.orchestrator.set_topics("../x", None).await.is_err());
    assert!(rig
        .orchestrator
        .set_topics("agent", Some("bad topic"))
        .await
        .is_err());
    assert_eq!(rig.orchestrator.settings(), before);
}
