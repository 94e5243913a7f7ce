//! End to end behaviour of a shared session, driven through the in-memory pty and
//! in-memory viewers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::Span;

use tty_relay::config::RelayConfig;
use tty_relay::protocol::{
    ConnectionResult, FrameReceiver, FrameSender, MSG_WRITE, MemoryPeer, MemoryTransport,
    TerminalTransport, TtyMessage,
};
use tty_relay::pty::{KILLED_EXIT_CODE, MockPtyFactory, WinSize};
use tty_relay::service::{PtySession, SessionEvent, SessionRegistry};

const WAIT: Duration = Duration::from_secs(2);

fn registry(factory: &MockPtyFactory) -> Arc<SessionRegistry> {
    let mut config = RelayConfig::default();
    config.terminal.inherit_host_size = false;
    config.refresh_delay_ms = 5;
    Arc::new(SessionRegistry::new(
        Arc::new(factory.clone()),
        Arc::new(config),
        Span::none(),
    ))
}

fn attach(session: &Arc<PtySession>, address: &str) -> (MemoryPeer, JoinHandle<bool>) {
    let (transport, peer) = MemoryTransport::pair(address);
    let session = session.clone();
    let handle = tokio::spawn(async move { session.handle_receiver(Box::new(transport)).await });
    (peer, handle)
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn attached(session: &Arc<PtySession>, n: usize) {
    eventually(|| async move { session.attached_count().await == n }).await;
}

#[tokio::test]
async fn viewers_share_input_and_output() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, created) = registry.get_or_create("1").await.unwrap();
    assert!(created);

    let (mut a, _a_task) = attach(&session, "viewer-a");
    attached(&session, 1).await;
    a.send(&TtyMessage::Write(b"echo hi\n".to_vec()));
    let seen = a.output_until(b"echo hi\n", WAIT).await;
    assert!(seen.ends_with(b"echo hi\n"));

    let (mut b, _b_task) = attach(&session, "viewer-b");
    attached(&session, 2).await;
    b.send(&TtyMessage::Write(b"ls\n".to_vec()));

    assert!(a.output_until(b"ls\n", WAIT).await.ends_with(b"ls\n"));
    assert!(b.output_until(b"ls\n", WAIT).await.ends_with(b"ls\n"));
    assert_eq!(factory.last().unwrap().written(), b"echo hi\nls\n");
}

#[tokio::test]
async fn write_honours_declared_size() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();
    let (peer, _task) = attach(&session, "viewer");
    attached(&session, 1).await;

    let payload = json!({ "Size": 5, "Data": STANDARD.encode(b"abcdefgh") });
    let envelope = json!({
        "Type": MSG_WRITE,
        "Data": STANDARD.encode(payload.to_string()),
    });
    peer.send_raw(envelope.to_string().as_bytes());

    let pty = factory.last().unwrap();
    let device = &pty;
    eventually(|| async move { !device.written().is_empty() }).await;
    assert_eq!(pty.written(), b"abcde");
}

#[tokio::test]
async fn resize_reaches_the_terminal() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();
    let (peer, _task) = attach(&session, "viewer");
    attached(&session, 1).await;

    // Let the attach refresh settle first.
    tokio::time::sleep(Duration::from_millis(30)).await;
    peer.send(&TtyMessage::WinSize { rows: 40, cols: 120 });

    let shared = &session;
    eventually(|| async move { shared.win_size().await.unwrap() == WinSize::new(40, 120) }).await;
    assert!(factory.last().unwrap().resize_history().contains(&WinSize::new(40, 120)));
}

#[tokio::test]
async fn attach_nudges_a_redraw() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();
    let (_peer, _task) = attach(&session, "viewer");
    attached(&session, 1).await;

    let pty = factory.last().unwrap();
    let device = &pty;
    eventually(|| async move { device.resize_history().len() >= 3 }).await;
    assert_eq!(
        pty.resize_history()[..3],
        [WinSize::new(24, 80), WinSize::new(23, 80), WinSize::new(24, 80)]
    );
}

#[tokio::test]
async fn stop_closes_every_viewer_once() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let mut events = registry.subscribe();
    let (session, _) = registry.get_or_create("1").await.unwrap();

    let (mut a, a_task) = attach(&session, "viewer-a");
    let (mut b, b_task) = attach(&session, "viewer-b");
    attached(&session, 2).await;

    session.stop().await;

    assert!(tokio::time::timeout(WAIT, a_task).await.unwrap().unwrap());
    assert!(tokio::time::timeout(WAIT, b_task).await.unwrap().unwrap());
    assert_eq!(a.close_count(), 1);
    assert_eq!(b.close_count(), 1);
    assert!(a.drain().contains(&TtyMessage::Terminate));
    assert!(b.drain().contains(&TtyMessage::Terminate));

    loop {
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let SessionEvent::Exited { id, exit } = event {
            assert_eq!(id, "1");
            assert_eq!(exit.unwrap().exit_code, KILLED_EXIT_CODE);
            break;
        }
    }
    assert!(!registry.list().await.contains(&"1".to_string()));
    assert_eq!(session.attached_count().await, 0);
}

#[tokio::test]
async fn stop_without_viewers() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("lonely").await.unwrap();

    session.stop().await;

    let sessions = &registry;
    eventually(|| async move { sessions.list().await.is_empty() }).await;
    assert!(factory.last().unwrap().has_exited());

    // Viewers arriving after teardown are turned away.
    let (peer, task) = attach(&session, "late");
    assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap());
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test]
async fn leaving_viewer_does_not_disturb_others() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();

    let (mut a, _a_task) = attach(&session, "viewer-a");
    let (mut b, b_task) = attach(&session, "viewer-b");
    attached(&session, 2).await;

    b.hang_up();
    assert!(tokio::time::timeout(WAIT, b_task).await.unwrap().unwrap());
    assert_eq!(session.attached_count().await, 1);
    assert_eq!(b.close_count(), 1);
    b.drain();

    a.send(&TtyMessage::Write(b"still here\n".to_vec()));
    assert!(a.output_until(b"still here\n", WAIT).await.ends_with(b"still here\n"));
    factory.last().unwrap().emit(b"more output\n");
    assert!(a.output_until(b"more output\n", WAIT).await.ends_with(b"more output\n"));

    // Nothing reaches the viewer that left.
    assert!(!b.drain().iter().any(|m| matches!(m, TtyMessage::Write(_))));
    assert_eq!(registry.list().await, vec!["1".to_string()]);
}

#[tokio::test]
async fn malformed_frame_ends_only_that_viewer() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();

    let (_a, _a_task) = attach(&session, "viewer-a");
    let (b, b_task) = attach(&session, "viewer-b");
    attached(&session, 2).await;

    b.send_raw(b"{not json");
    assert!(tokio::time::timeout(WAIT, b_task).await.unwrap().unwrap());
    assert_eq!(session.attached_count().await, 1);
    assert!(!factory.last().unwrap().has_exited());
}

#[tokio::test]
async fn exit_closes_viewers_and_deregisters() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();
    let (a, a_task) = attach(&session, "viewer-a");
    attached(&session, 1).await;

    factory.last().unwrap().exit(0);

    assert!(tokio::time::timeout(WAIT, a_task).await.unwrap().unwrap());
    assert_eq!(a.close_count(), 1);
    let sessions = &registry;
    eventually(|| async move { sessions.get("1").await.is_none() }).await;

    // The id is free again; the next request starts a fresh command.
    let (fresh, created) = registry.get_or_create("1").await.unwrap();
    assert!(created);
    assert!(!Arc::ptr_eq(&fresh, &session));
    assert_eq!(factory.spawned().len(), 2);
}

#[tokio::test]
async fn duplicate_add_keeps_the_first_session() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let first = registry.create("dup", "bash", &[]).await.unwrap();
    let second = registry.create("dup", "bash", &[]).await.unwrap();

    registry.add("dup", first.clone()).await.unwrap();
    assert!(registry.add("dup", second).await.is_err());
    assert!(Arc::ptr_eq(&registry.get("dup").await.unwrap(), &first));
}

#[tokio::test]
async fn added_session_leaves_the_list_when_stopped() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let session = registry.create("manual", "top", &[]).await.unwrap();
    registry.add("manual", session.clone()).await.unwrap();
    assert_eq!(registry.list().await, vec!["manual".to_string()]);

    session.stop().await;

    let sessions = &registry;
    eventually(|| async move { sessions.list().await.is_empty() }).await;
    assert_eq!(factory.spawned_configs()[0].command, "top");
}

#[tokio::test]
async fn first_viewer_sees_output_printed_before_it_attached() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();

    factory.last().unwrap().emit(b"PROMPT$ ");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (mut a, _a_task) = attach(&session, "viewer-a");
    let seen = a.output_until(b"PROMPT$ ", WAIT).await;
    assert_eq!(seen, b"PROMPT$ ");
}

#[tokio::test]
async fn output_between_viewers_is_kept_for_the_next_one() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();

    let (mut a, a_task) = attach(&session, "viewer-a");
    attached(&session, 1).await;
    a.hang_up();
    assert!(tokio::time::timeout(WAIT, a_task).await.unwrap().unwrap());

    factory.last().unwrap().emit(b"while nobody watched\n");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (mut b, _b_task) = attach(&session, "viewer-b");
    let seen = b.output_until(b"while nobody watched\n", WAIT).await;
    assert!(seen.ends_with(b"while nobody watched\n"));
}

/// Transport whose close never completes, like a peer that stopped reading.
#[derive(Debug)]
struct UnclosableTransport;

struct UnclosableSender;

#[async_trait::async_trait]
impl FrameSender for UnclosableSender {
    async fn send_frame(&mut self, _frame: String) -> ConnectionResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        std::future::pending().await
    }
}

struct IdleReceiver;

#[async_trait::async_trait]
impl FrameReceiver for IdleReceiver {
    async fn recv_frame(&mut self) -> Option<ConnectionResult<Vec<u8>>> {
        std::future::pending().await
    }
}

impl TerminalTransport for UnclosableTransport {
    fn address(&self) -> String {
        "unclosable".to_string()
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
        (Box::new(UnclosableSender), Box::new(IdleReceiver))
    }
}

#[tokio::test]
async fn stop_does_not_hang_on_a_stuck_viewer() {
    let factory = MockPtyFactory::new();
    let registry = registry(&factory);
    let (session, _) = registry.get_or_create("1").await.unwrap();

    let stuck = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_receiver(Box::new(UnclosableTransport)).await })
    };
    let (mut other, other_task) = attach(&session, "viewer");
    attached(&session, 2).await;

    tokio::time::timeout(Duration::from_secs(3), session.stop())
        .await
        .expect("stop stalled on the stuck viewer");

    assert!(tokio::time::timeout(WAIT, stuck).await.unwrap().unwrap());
    assert!(tokio::time::timeout(WAIT, other_task).await.unwrap().unwrap());
    assert_eq!(other.close_count(), 1);
    assert!(other.drain().contains(&TtyMessage::Terminate));

    // The connection list is free again right away.
    let (late, late_task) = attach(&session, "late");
    assert!(tokio::time::timeout(WAIT, late_task).await.unwrap().unwrap());
    assert_eq!(late.close_count(), 1);
}
