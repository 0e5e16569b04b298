// Session lifetime: process-exited is raised exactly once however the session ends

mod common;

use common::{attach, next_event, Message};
use pydbg_client::{DebugConnection, DebugError, DebugEvent, SessionConfig, UNKNOWN_EXIT_CODE};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts process-exited events and records the last exit code
fn count_exits(conn: &DebugConnection) -> (Arc<AtomicUsize>, Arc<AtomicI32>) {
    let count = Arc::new(AtomicUsize::new(0));
    let code = Arc::new(AtomicI32::new(i32::MIN));
    let (c, k) = (count.clone(), code.clone());
    conn.subscribe(move |event| {
        if let DebugEvent::ProcessExited { exit_code } = event {
            c.fetch_add(1, Ordering::SeqCst);
            k.store(*exit_code, Ordering::SeqCst);
        }
    });
    (count, code)
}

async fn settle(conn: &DebugConnection) {
    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .expect("session did not shut down");
    // Let any straggling teardown run before counting
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_exit_message_then_socket_close() {
    let (conn, mut debuggee) = attach(SessionConfig::default()).await;
    let (count, code) = count_exits(&conn);

    debuggee.send(Message::new(b"EXIT").int(3)).await;
    debuggee.expect_token(b"exit").await;
    drop(debuggee);

    settle(&conn).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(code.load(Ordering::SeqCst), 3);
    assert!(conn.has_exited());
}

#[tokio::test]
async fn test_socket_close() {
    let (conn, debuggee) = attach(SessionConfig::default()).await;
    let (count, code) = count_exits(&conn);

    drop(debuggee);

    settle(&conn).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(code.load(Ordering::SeqCst), UNKNOWN_EXIT_CODE);
}

#[tokio::test]
async fn test_terminate() {
    let (conn, mut debuggee) = attach(SessionConfig::default()).await;
    let (count, _) = count_exits(&conn);

    conn.terminate();
    conn.terminate();
    settle(&conn).await;
    assert!(debuggee.is_closed().await);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(matches!(
        conn.break_all().await,
        Err(DebugError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_detach_message_reports_exit_and_keeps_reading() {
    let (conn, mut debuggee) = attach(SessionConfig::default()).await;
    let (count, _) = count_exits(&conn);
    let mut events = conn.event_channel();

    conn.detach().await;
    debuggee.expect_token(b"detc").await;
    debuggee.send(Message::new(b"DETC")).await;
    assert_eq!(
        next_event(&mut events).await,
        DebugEvent::ProcessExited {
            exit_code: UNKNOWN_EXIT_CODE
        }
    );

    debuggee.send(Message::new(b"NEWT").int(1)).await;
    assert_eq!(
        next_event(&mut events).await,
        DebugEvent::ThreadCreated { thread: 1 }
    );

    drop(debuggee);
    settle(&conn).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_token_ends_session() {
    let (conn, mut debuggee) = attach(SessionConfig::default()).await;
    let (count, _) = count_exits(&conn);

    debuggee.send(Message::new(b"WHAT")).await;

    settle(&conn).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_truncated_message_ends_session() {
    let (conn, mut debuggee) = attach(SessionConfig::default()).await;
    let (count, _) = count_exits(&conn);

    // Thread id cut short
    debuggee.send(Message::new(b"NEWT").raw(&[1, 0])).await;
    drop(debuggee);

    settle(&conn).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undelivered_string_hits_read_deadline() {
    let config = SessionConfig {
        payload_read_timeout_ms: Some(100),
        ..SessionConfig::default()
    };
    let (conn, mut debuggee) = attach(config).await;
    let (count, _) = count_exits(&conn);

    // Advertises ten bytes of output, delivers three, and keeps the socket open
    debuggee
        .send(Message::new(b"OUTP").int(1).raw(&[b'U', 10, 0, 0, 0, b'a', b'b', b'c']))
        .await;

    settle(&conn).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    drop(debuggee);
}

#[tokio::test]
async fn test_pending_evaluation_fails_when_session_ends() {
    let (conn, mut debuggee) = attach(SessionConfig::default()).await;
    let frame = pydbg_client::StackFrame::new(1, 0, "f".into(), "a.py".into(), 1, 2, 1, 0, vec![]);

    let caller = conn.clone();
    let pending = tokio::spawn(async move { caller.execute_text("slow()", &frame).await });
    debuggee.expect_token(b"exec").await;
    drop(debuggee);

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(DebugError::ConnectionClosed)));
    assert_eq!(conn.pending_requests(), 0);
}

#[tokio::test]
async fn test_remove_breakpoint_after_exit_sends_nothing() {
    let (conn, debuggee) = attach(SessionConfig::default()).await;
    let bp = conn.add_breakpoint("a.py", 1, None, false);

    drop(debuggee);
    settle(&conn).await;

    let removed = conn.remove_breakpoint(bp.id).await.unwrap();
    assert_eq!(removed.id, bp.id);
    assert!(conn.breakpoints().is_empty());
}
