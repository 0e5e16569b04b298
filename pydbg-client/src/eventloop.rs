// Session event loop
//
// Two tasks per connection. The dispatch task owns the read half: it reads one
// token at a time and runs the matching handler to completion, pulling that
// message's fields straight off the socket, before reading the next token. The
// writer task owns the write half and drains the outbound queues, so frames from
// concurrent callers never interleave on the wire. Replies the dispatch task makes
// on its own (`exit`, `rest`, `sehi`) go through an unbounded lane so a full
// caller queue never stalls the reader.

use crate::breakpoint::BreakpointRegistry;
use crate::commands::{command_tokens, event_tokens, token_name, Token};
use crate::config::SessionConfig;
use crate::events::{DebugEvent, Subscribers};
use crate::exceptions::{handler_info_frame, ExceptionHandlerSource};
use crate::ids::IdDispenser;
use crate::pathmap::{MapDirection, PathMapper};
use crate::pending::{ChildrenCompletion, ExecuteCompletion, PendingTable};
use crate::protocol::{CommandFrame, DebugError, DebugResult};
use crate::reader::WireReader;
use crate::thread::{read_evaluation_value, read_frame_list, ThreadMap};
use crate::types::*;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Exit code reported when the session ends without an explicit exit message
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// An encoded frame waiting for the writer. `done` receives the write result.
pub(crate) struct WriteRequest {
    pub frame: Bytes,
    pub done: Option<oneshot::Sender<DebugResult<()>>>,
}

/// Sending side of the outbound queues
#[derive(Clone, Debug)]
pub(crate) struct Outbox {
    tx: mpsc::Sender<WriteRequest>,
    replies: mpsc::UnboundedSender<Bytes>,
}

impl Outbox {
    /// Queue a frame and wait until the writer has put it on the socket
    pub async fn send(&self, frame: &CommandFrame) -> DebugResult<()> {
        debug!("Sending {}", token_name(&frame.token));
        let (done_tx, done_rx) = oneshot::channel();

        self.tx
            .send(WriteRequest {
                frame: frame.encode(),
                done: Some(done_tx),
            })
            .await
            .map_err(|_| DebugError::ConnectionClosed)?;

        done_rx.await.map_err(|_| DebugError::ConnectionClosed)?
    }

    /// Queue a frame ahead of caller commands without waiting. Used by the
    /// dispatch task, which must not stall on the socket or on queue space.
    pub fn post(&self, frame: &CommandFrame) -> DebugResult<()> {
        debug!("Posting {}", token_name(&frame.token));
        self.replies
            .send(frame.encode())
            .map_err(|_| DebugError::ConnectionClosed)
    }
}

/// State shared between the caller-facing connection and the dispatch task
pub(crate) struct SessionState {
    pub session_id: Uuid,
    pub version: LanguageVersion,
    pub paths: PathMapper,
    pub ids: IdDispenser,
    pub executes: PendingTable<ExecuteCompletion>,
    pub children: PendingTable<ChildrenCompletion>,
    pub breakpoints: Mutex<BreakpointRegistry>,
    pub threads: Mutex<ThreadMap>,
    /// One outstanding frame request per session: the thread asked for and its waiter
    pub frame_waiter: Mutex<Option<(ThreadId, oneshot::Sender<Vec<StackFrame>>)>>,
    pub set_line_waiter: Mutex<Option<oneshot::Sender<bool>>>,
    pub subscribers: Arc<Subscribers>,
    pub handler_source: Arc<dyn ExceptionHandlerSource>,
    pub stopped_for_exception: AtomicBool,
    exited: AtomicBool,
    pub shutdown: CancellationToken,
}

impl SessionState {
    pub fn new(
        session_id: Uuid,
        version: LanguageVersion,
        paths: PathMapper,
        handler_source: Arc<dyn ExceptionHandlerSource>,
    ) -> Self {
        Self {
            session_id,
            version,
            paths,
            ids: IdDispenser::new(),
            executes: PendingTable::new(),
            children: PendingTable::new(),
            breakpoints: Mutex::new(BreakpointRegistry::new()),
            threads: Mutex::new(ThreadMap::new()),
            frame_waiter: Mutex::new(None),
            set_line_waiter: Mutex::new(None),
            subscribers: Arc::new(Subscribers::new()),
            handler_source,
            stopped_for_exception: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Raise process-exited. Only the first call per session emits the event.
    pub fn process_exited(&self, exit_code: i32) {
        if self.exited.swap(true, Ordering::SeqCst) {
            debug!("Process exit ({}) already reported", exit_code);
            return;
        }
        info!("Debuggee exited with code {}", exit_code);
        self.subscribers.emit(&DebugEvent::ProcessExited { exit_code });
    }

    fn emit(&self, event: DebugEvent) {
        self.subscribers.emit(&event);
    }
}

/// Start the writer and dispatch tasks for a connected debuggee
pub(crate) fn spawn_event_loop<R, W>(
    reader: R,
    writer: W,
    state: Arc<SessionState>,
    config: &SessionConfig,
) -> Outbox
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.command_queue_capacity);
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();
    let outbox = Outbox {
        tx,
        replies: replies_tx,
    };

    tokio::spawn(writer_task(writer, rx, replies_rx, state.shutdown.clone()));
    tokio::spawn(dispatch_task(
        WireReader::new(reader, config.payload_read_timeout()),
        state,
        outbox.clone(),
    ));

    outbox
}

async fn writer_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<WriteRequest>,
    mut replies: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) {
    debug!("Writer task started");

    loop {
        // Drain what is already queued (e.g. the `exit` reply) before honouring shutdown
        let request = tokio::select! {
            biased;
            Some(frame) = replies.recv() => WriteRequest { frame, done: None },
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        // A peer that stopped reading must not keep the writer alive past shutdown
        let (result, cancelled) = tokio::select! {
            biased;
            result = write_frame(&mut writer, &request.frame) => (result, false),
            _ = shutdown.cancelled() => (Err(DebugError::ConnectionClosed), true),
        };
        if let Err(e) = &result {
            error!("Failed to write command: {}", e);
        }
        if let Some(done) = request.done {
            done.send(result).ok();
        }
        if cancelled {
            break;
        }
    }

    writer.shutdown().await.ok();
    debug!("Writer task shutting down");
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> DebugResult<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

enum Flow {
    Continue,
    Stop,
}

async fn dispatch_task<R: AsyncRead + Unpin>(
    mut reader: WireReader<R>,
    state: Arc<SessionState>,
    outbox: Outbox,
) {
    info!("Dispatch loop started for session {}", state.session_id);

    loop {
        let step = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            step = next_message(&mut reader, &state, &outbox) => step,
        };

        match step {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(DebugError::ConnectionClosed) => {
                info!("Debuggee closed the connection");
                break;
            }
            Err(e) => {
                error!("Dispatch loop failed: {}", e);
                break;
            }
        }
    }

    state.shutdown.cancel();

    // Release the ids first so a failed waiter never sees its request as in flight
    let executes = state.executes.drain();
    let children = state.children.drain();
    for id in executes.iter().map(|(id, _)| id).chain(children.iter().map(|(id, _)| id)) {
        state.ids.free(*id);
    }
    if !executes.is_empty() || !children.is_empty() {
        warn!(
            "Dropping {} unanswered evaluation requests",
            executes.len() + children.len()
        );
    }
    drop(executes);
    drop(children);
    state.frame_waiter.lock().take();
    state.set_line_waiter.lock().take();

    state.process_exited(UNKNOWN_EXIT_CODE);
    info!("Dispatch loop shutting down");
}

async fn next_message<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    state: &SessionState,
    outbox: &Outbox,
) -> DebugResult<Flow> {
    let token = reader.read_token().await?;
    debug!("Received {}", token_name(&token));
    dispatch(token, reader, state, outbox).await
}

async fn dispatch<R: AsyncRead + Unpin>(
    token: Token,
    reader: &mut WireReader<R>,
    state: &SessionState,
    outbox: &Outbox,
) -> DebugResult<Flow> {
    match token {
        event_tokens::EXCEPTION => handle_exception(reader, state).await?,
        event_tokens::BREAKPOINT_HIT => handle_breakpoint_hit(reader, state, outbox).await?,
        event_tokens::THREAD_CREATE => {
            let thread = reader.read_i32().await?;
            let created = state.threads.lock().create(thread);
            debug!("Thread {} created (worker: {})", thread, created.is_worker);
            state.emit(DebugEvent::ThreadCreated { thread });
        }
        event_tokens::THREAD_EXIT => {
            let thread = reader.read_i32().await?;
            let removed = state.threads.lock().remove(thread);
            match removed {
                Some(_) => state.emit(DebugEvent::ThreadExited { thread }),
                None => debug!("Exit for unknown thread {}", thread),
            }
        }
        event_tokens::MODULE_LOAD => {
            let id = reader.read_i32().await?;
            if let Some(filename) = reader.read_string().await? {
                let filename = state.paths.map(&filename, MapDirection::FromDebuggee);
                debug!("Module loaded ({}): {}", id, filename);
                state.emit(DebugEvent::ModuleLoaded {
                    module: ModuleInfo { id, filename },
                });
            }
        }
        event_tokens::STEP_DONE => {
            let thread = reader.read_i32().await?;
            state.emit(DebugEvent::StepComplete { thread });
        }
        event_tokens::PROCESS_EXIT => {
            let exit_code = reader.read_i32().await?;
            state.process_exited(exit_code);
            outbox.post(&CommandFrame::new(command_tokens::EXIT))?;
            return Ok(Flow::Stop);
        }
        event_tokens::BREAKPOINT_SET => {
            let id = reader.read_i32().await?;
            let bound = state.breakpoints.lock().mark_bound(id);
            if let Some(breakpoint) = bound {
                state.emit(DebugEvent::BreakpointBindSucceeded { breakpoint });
            }
        }
        event_tokens::BREAKPOINT_FAILED => {
            let id = reader.read_i32().await?;
            let failed = state.breakpoints.lock().mark_failed(id);
            if let Some(breakpoint) = failed {
                state.emit(DebugEvent::BreakpointBindFailed { breakpoint });
            }
        }
        event_tokens::PROCESS_LOAD => {
            let thread = reader.read_i32().await?;
            info!("Process loaded, session {}", state.session_id);
            state.emit(DebugEvent::ProcessLoaded { thread });
        }
        event_tokens::THREAD_FRAME_LIST => handle_frame_list(reader, state).await?,
        event_tokens::EXECUTION_RESULT => {
            let id = reader.read_i32().await?;
            let value = read_evaluation_value(reader, state.version).await?;
            complete_execute(state, id, value);
        }
        event_tokens::EXECUTION_EXCEPTION => {
            let id = reader.read_i32().await?;
            let text = reader.read_string_or_empty().await?;
            complete_execute(state, id, EvaluationValue::Exception { text });
        }
        event_tokens::ASYNC_BREAK => {
            let thread = reader.read_i32().await?;
            debug!("Async break on thread {}", thread);
            state.emit(DebugEvent::AsyncBreakComplete { thread });
        }
        event_tokens::SET_LINE_RESULT => handle_set_line_result(reader, state).await?,
        event_tokens::ENUM_CHILDREN => handle_enum_children(reader, state).await?,
        event_tokens::DEBUGGER_OUTPUT => {
            let thread = reader.read_i32().await?;
            let output = reader.read_string_or_empty().await?;
            let known = state.threads.lock().contains(thread);
            if known {
                state.emit(DebugEvent::DebuggerOutput { thread, output });
            } else {
                debug!("Output from unknown thread {}", thread);
            }
        }
        event_tokens::REQUEST_HANDLERS => {
            let filename = reader.read_string_or_empty().await?;
            debug!("Exception handlers requested for {}", filename);
            let local = state.paths.map(&filename, MapDirection::FromDebuggee);
            let ranges = state.handler_source.handled_ranges(&local);
            outbox.post(&handler_info_frame(&filename, &ranges))?;
        }
        event_tokens::DETACH => {
            info!("Debuggee detached");
            state.process_exited(UNKNOWN_EXIT_CODE);
        }
        other => return Err(DebugError::UnknownToken(other)),
    }

    Ok(Flow::Continue)
}

async fn handle_exception<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    state: &SessionState,
) -> DebugResult<()> {
    let type_name = reader.read_string().await?;
    let thread = reader.read_i32().await?;
    let description = reader.read_string().await?;

    state.stopped_for_exception.store(true, Ordering::SeqCst);

    match (type_name, description) {
        (Some(type_name), Some(description)) => {
            debug!("Exception {} on thread {}", type_name, thread);
            state.emit(DebugEvent::ExceptionRaised {
                thread,
                exception: ExceptionInfo {
                    type_name,
                    description,
                },
            });
        }
        _ => debug!("Exception on thread {} without type or description", thread),
    }
    Ok(())
}

async fn handle_breakpoint_hit<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    state: &SessionState,
    outbox: &Outbox,
) -> DebugResult<()> {
    let id = reader.read_i32().await?;
    let thread = reader.read_i32().await?;

    let breakpoint = state.breakpoints.lock().get(id).cloned();
    match breakpoint {
        Some(breakpoint) => state.emit(DebugEvent::BreakpointHit { breakpoint, thread }),
        None => {
            // The thread is parked waiting for us; nobody else will resume it
            warn!("Hit on unknown breakpoint {}, resuming thread {}", id, thread);
            let mut frame = CommandFrame::new(command_tokens::RESUME_THREAD);
            frame.put_i32(thread);
            outbox.post(&frame)?;
        }
    }
    Ok(())
}

async fn handle_frame_list<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    state: &SessionState,
) -> DebugResult<()> {
    let thread = reader.read_i32().await?;
    let frames = read_frame_list(reader, thread, state.version, &state.paths).await?;
    debug!("Received {} frames for thread {}", frames.len(), thread);

    if !state.threads.lock().replace_frames(thread, frames.clone()) {
        debug!("Frames for unknown thread {}", thread);
    }

    let waiter = {
        let mut slot = state.frame_waiter.lock();
        match slot.as_ref() {
            Some((wanted, _)) if *wanted == thread => slot.take(),
            _ => None,
        }
    };
    if let Some((_, tx)) = waiter {
        if tx.send(frames).is_err() {
            debug!("Frame waiter for thread {} gave up", thread);
        }
    }
    Ok(())
}

async fn handle_set_line_result<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    state: &SessionState,
) -> DebugResult<()> {
    // Result, thread and new line are always sent; the last two are zero-filled
    // on failure
    let succeeded = reader.read_i32().await? != 0;
    let thread = reader.read_i32().await?;
    let line = reader.read_i32().await?;
    if succeeded {
        debug!("Thread {} moved to line {}", thread, line);
    }

    let waiter = state.set_line_waiter.lock().take();
    match waiter {
        Some(tx) => {
            tx.send(succeeded).ok();
        }
        None => debug!("Set-line result ({}) with nobody waiting", succeeded),
    }
    Ok(())
}

async fn handle_enum_children<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    state: &SessionState,
) -> DebugResult<()> {
    let id = reader.read_i32().await?;
    let count = reader.read_i32().await?;
    let child_is_index = reader.read_flag().await?;

    let mut raw = Vec::with_capacity(count.clamp(0, 256) as usize);
    for _ in 0..count {
        let name = reader.read_string_or_empty().await?;
        let value = read_evaluation_value(reader, state.version).await?;
        raw.push((name, value));
    }

    // Ids are shared with execute requests; only release one this table held
    let Some(request) = state.children.take(id) else {
        warn!("Children for unknown request {}", id);
        return Ok(());
    };
    state.ids.free(id);

    let frame = request.frame.frame_ref();
    let children = raw
        .into_iter()
        .map(|(name, value)| EvaluationResult {
            expression: request.expression.clone(),
            child_name: Some(name),
            child_is_index,
            frame,
            value,
        })
        .collect();
    (request.completion)(children);
    Ok(())
}

fn complete_execute(state: &SessionState, id: CorrelationId, value: EvaluationValue) {
    match state.executes.take(id) {
        Some(request) => {
            state.ids.free(id);
            debug!("Execution result for request {}", id);
            let result = EvaluationResult {
                expression: request.expression,
                child_name: None,
                child_is_index: false,
                frame: request.frame.frame_ref(),
                value,
            };
            (request.completion)(result);
        }
        None => warn!("Execution result for unknown request {}", id),
    }
}
