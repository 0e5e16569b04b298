// Wait for a debuggee and log everything it reports
//
// Usage: cargo run --example trace_session -- [port] [version] [session-id]
// Launch the debuggee with the printed port and session id.

use pydbg_client::{DebugConnection, DebugEvent, DebugListener, NoHandlerInfo, SessionConfig};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pydbg_client=debug,trace_session=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(0);
    let version = args.next().unwrap_or_else(|| "2.7".to_string());
    let session_id = match args.next() {
        Some(id) => Uuid::parse_str(&id)?,
        None => DebugListener::new_session_id(),
    };

    let config = match std::env::var("PYDBG_CONFIG") {
        Ok(path) => SessionConfig::load(path.as_ref())?,
        Err(_) => SessionConfig::default(),
    };

    let listener = DebugListener::bind(("127.0.0.1", port), config).await?;
    println!("Listening on {}", listener.local_addr()?);
    println!("Session id {}", session_id);

    let conn =
        DebugConnection::attach(&listener, session_id, &version, Arc::new(NoHandlerInfo)).await?;
    let mut events = conn.event_channel();

    while let Some(event) = events.recv().await {
        info!("{}", serde_json::to_string(&event)?);

        match event {
            DebugEvent::ProcessLoaded { thread } => {
                info!("Debuggee loaded, resuming thread {}", thread);
                conn.resume_all().await?;
            }
            DebugEvent::BreakpointHit { thread, .. }
            | DebugEvent::StepComplete { thread }
            | DebugEvent::AsyncBreakComplete { thread } => {
                for frame in conn.get_thread_frames(thread).await? {
                    info!(
                        "  {} ({}:{}) args={} locals={}",
                        frame.function_name,
                        frame.filename,
                        frame.line,
                        frame.arguments().len(),
                        frame.locals().len()
                    );
                }
                conn.resume_thread(thread).await?;
            }
            DebugEvent::ExceptionRaised { thread, .. } => {
                conn.resume_thread(thread).await?;
            }
            DebugEvent::ProcessExited { exit_code } => {
                println!("Debuggee exited with code {}", exit_code);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
