// Debug session connection
//
// Caller-facing command surface for one connected debuggee. Commands are encoded
// here and handed to the writer task; responses and events come back through the
// dispatch task started in eventloop.rs.

use crate::attach::DebugListener;
use crate::breakpoint::Breakpoint;
use crate::commands::{command_tokens, Token};
use crate::config::SessionConfig;
use crate::eventloop::{spawn_event_loop, Outbox, SessionState};
use crate::events::{DebugEvent, SubscriptionId};
use crate::exceptions::{exception_info_frame, ExceptionHandlerSource, NoHandlerInfo};
use crate::pathmap::{MapDirection, PathMapper};
use crate::pending::PendingRequest;
use crate::protocol::*;
use crate::thread::DebugThread;
use crate::types::*;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct DebugConnection {
    state: Arc<SessionState>,
    outbox: Outbox,
    frame_timeout: Duration,
    set_line_timeout: Duration,
}

impl fmt::Debug for DebugConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugConnection")
            .field("session_id", &self.state.session_id)
            .field("version", &self.state.version)
            .field("exited", &self.state.has_exited())
            .finish()
    }
}

impl DebugConnection {
    /// Start a session over an already connected stream. Must be called from
    /// within a tokio runtime.
    pub fn start<S>(stream: S, version: LanguageVersion, config: &SessionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::start_with(stream, Uuid::new_v4(), version, config, Arc::new(NoHandlerInfo))
    }

    /// Like `start`, with an explicit session id and exception handler source
    pub fn start_with<S>(
        stream: S,
        session_id: Uuid,
        version: LanguageVersion,
        config: &SessionConfig,
        handler_source: Arc<dyn ExceptionHandlerSource>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        info!("Starting debug session {} ({})", session_id, version);

        let state = Arc::new(SessionState::new(
            session_id,
            version,
            PathMapper::new(config.path_mappings.clone()),
            handler_source,
        ));

        let (reader, writer) = tokio::io::split(stream);
        let outbox = spawn_event_loop(reader, writer, state.clone(), config);

        Self {
            state,
            outbox,
            frame_timeout: config.frame_timeout(),
            set_line_timeout: config.set_line_timeout(),
        }
    }

    /// Wait for the debuggee identified by `session_id` to connect to `listener`,
    /// then start the session
    pub async fn attach(
        listener: &DebugListener,
        session_id: Uuid,
        version_tag: &str,
        handler_source: Arc<dyn ExceptionHandlerSource>,
    ) -> Result<Self, AttachError> {
        let (stream, version) = listener.accept(session_id, version_tag).await?;
        Ok(Self::start_with(
            stream,
            session_id,
            version,
            listener.config(),
            handler_source,
        ))
    }

    pub fn session_id(&self) -> Uuid {
        self.state.session_id
    }

    pub fn language_version(&self) -> LanguageVersion {
        self.state.version
    }

    pub fn has_exited(&self) -> bool {
        self.state.has_exited()
    }

    /// True from an exception stop until the next resume
    pub fn stopped_for_exception(&self) -> bool {
        self.state.stopped_for_exception.load(Ordering::SeqCst)
    }

    /// Resolves once both session tasks have been told to stop
    pub async fn closed(&self) {
        self.state.shutdown.cancelled().await
    }

    // Events

    /// Register an event handler. Handlers run on the dispatch task, in arrival
    /// order, and must not block.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DebugEvent) + Send + Sync + 'static,
    {
        self.state.subscribers.subscribe(Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.subscribers.unsubscribe(id)
    }

    /// Every event from now on, for async consumers
    pub fn event_channel(&self) -> mpsc::UnboundedReceiver<DebugEvent> {
        self.state.subscribers.channel()
    }

    // Execution control

    pub async fn break_all(&self) -> DebugResult<()> {
        self.outbox
            .send(&CommandFrame::new(command_tokens::BREAK_ALL))
            .await
    }

    pub async fn resume_all(&self) -> DebugResult<()> {
        self.state.stopped_for_exception.store(false, Ordering::SeqCst);
        self.outbox
            .send(&CommandFrame::new(command_tokens::RESUME_ALL))
            .await
    }

    pub async fn resume_thread(&self, thread: ThreadId) -> DebugResult<()> {
        self.state.stopped_for_exception.store(false, Ordering::SeqCst);
        self.send_thread_command(command_tokens::RESUME_THREAD, thread).await
    }

    pub async fn clear_stepping(&self, thread: ThreadId) -> DebugResult<()> {
        self.send_thread_command(command_tokens::CLEAR_STEPPING, thread).await
    }

    pub async fn step_into(&self, thread: ThreadId) -> DebugResult<()> {
        self.send_thread_command(command_tokens::STEP_INTO, thread).await
    }

    pub async fn step_over(&self, thread: ThreadId) -> DebugResult<()> {
        self.send_thread_command(command_tokens::STEP_OVER, thread).await
    }

    pub async fn step_out(&self, thread: ThreadId) -> DebugResult<()> {
        self.send_thread_command(command_tokens::STEP_OUT, thread).await
    }

    /// Ask the debuggee to let go. Write failures are ignored: the debuggee
    /// may already be gone.
    pub async fn detach(&self) {
        info!("Detaching from session {}", self.state.session_id);
        if let Err(e) = self
            .outbox
            .send(&CommandFrame::new(command_tokens::DETACH))
            .await
        {
            debug!("Detach not delivered: {}", e);
        }
    }

    /// Drop the connection. Process-exited is raised (once) by the dispatch task
    /// as it shuts down.
    pub fn terminate(&self) {
        info!("Terminating session {}", self.state.session_id);
        self.state.shutdown.cancel();
    }

    async fn send_thread_command(&self, token: Token, thread: ThreadId) -> DebugResult<()> {
        let mut frame = CommandFrame::new(token);
        frame.put_i32(thread);
        self.outbox.send(&frame).await
    }

    // Breakpoints

    /// Register a breakpoint. Nothing is sent until `bind_breakpoint`.
    pub fn add_breakpoint(
        &self,
        filename: &str,
        line: i32,
        condition: Option<&str>,
        break_when_changed: bool,
    ) -> Breakpoint {
        let breakpoint = self
            .state
            .breakpoints
            .lock()
            .add(filename, line, condition, break_when_changed);
        debug!(
            "Added breakpoint {} at {}:{}",
            breakpoint.id, breakpoint.filename, breakpoint.line
        );
        breakpoint
    }

    /// Send the breakpoint to the debuggee. The outcome arrives later as a
    /// bind-succeeded or bind-failed event.
    pub async fn bind_breakpoint(&self, id: BreakpointId) -> DebugResult<()> {
        let breakpoint = self
            .state
            .breakpoints
            .lock()
            .get(id)
            .cloned()
            .ok_or(DebugError::UnknownBreakpoint(id))?;

        let remote = self
            .state
            .paths
            .map(&breakpoint.filename, MapDirection::ToDebuggee);

        let mut frame = CommandFrame::new(command_tokens::SET_BREAKPOINT);
        frame
            .put_i32(breakpoint.id)
            .put_i32(breakpoint.line)
            .put_string(&remote)
            .put_string(breakpoint.condition.as_deref().unwrap_or(""))
            .put_bool(breakpoint.break_when_changed);
        self.outbox.send(&frame).await
    }

    pub async fn set_breakpoint_condition(
        &self,
        id: BreakpointId,
        condition: Option<&str>,
        break_when_changed: bool,
    ) -> DebugResult<()> {
        let breakpoint = self
            .state
            .breakpoints
            .lock()
            .set_condition(id, condition, break_when_changed)
            .ok_or(DebugError::UnknownBreakpoint(id))?;

        let mut frame = CommandFrame::new(command_tokens::SET_BREAKPOINT_CONDITION);
        frame
            .put_i32(breakpoint.id)
            .put_string(breakpoint.condition.as_deref().unwrap_or(""))
            .put_bool(breakpoint.break_when_changed);
        self.outbox.send(&frame).await
    }

    /// Forget the breakpoint immediately, then tell the debuggee to disable it
    /// (unless the process is already gone)
    pub async fn remove_breakpoint(&self, id: BreakpointId) -> DebugResult<Breakpoint> {
        let removed = self
            .state
            .breakpoints
            .lock()
            .remove(id)
            .ok_or(DebugError::UnknownBreakpoint(id))?;

        if !self.state.has_exited() {
            let mut frame = CommandFrame::new(command_tokens::REMOVE_BREAKPOINT);
            frame.put_i32(removed.line).put_i32(removed.id);
            self.outbox.send(&frame).await?;
        }
        Ok(removed)
    }

    pub fn breakpoint(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.state.breakpoints.lock().get(id).cloned()
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.state.breakpoints.lock().all()
    }

    // Threads and frames

    pub fn threads(&self) -> Vec<DebugThread> {
        self.state.threads.lock().all()
    }

    pub fn thread(&self, id: ThreadId) -> Option<DebugThread> {
        self.state.threads.lock().get(id).cloned()
    }

    /// Returns false for an unknown thread
    pub fn set_thread_name(&self, id: ThreadId, name: &str) -> bool {
        self.state.threads.lock().rename(id, name)
    }

    /// Request the thread's current stack and wait for it, up to the frame
    /// timeout. An empty list means the frames are unknown, not that there are none.
    pub async fn get_thread_frames(&self, thread: ThreadId) -> DebugResult<Vec<StackFrame>> {
        let (tx, rx) = oneshot::channel();
        // Replaces (and so abandons) any earlier waiter
        *self.state.frame_waiter.lock() = Some((thread, tx));

        // The budget covers getting the request onto the wire, not just the reply
        let exchange = async {
            self.send_thread_command(command_tokens::GET_THREAD_FRAMES, thread).await?;
            Ok::<_, DebugError>(rx.await.ok())
        };

        match tokio::time::timeout(self.frame_timeout, exchange).await {
            Ok(Ok(Some(frames))) => Ok(frames),
            Ok(Ok(None)) => {
                debug!("Frame request for thread {} was superseded", thread);
                Ok(Vec::new())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "No frames for thread {} within {:?}",
                    thread, self.frame_timeout
                );
                Ok(Vec::new())
            }
        }
    }

    /// Move the frame's next line. A timeout reads the same as a refusal.
    pub async fn set_line_number(&self, frame: &StackFrame, line: i32) -> DebugResult<bool> {
        if self.stopped_for_exception() {
            debug!("Set-line refused while stopped for an exception");
            return Ok(false);
        }

        let (tx, rx) = oneshot::channel();
        *self.state.set_line_waiter.lock() = Some(tx);

        let mut command = CommandFrame::new(command_tokens::SET_LINE_NUMBER);
        command
            .put_i32(frame.thread_id)
            .put_i32(frame.frame_id)
            .put_i32(line);
        let exchange = async {
            self.outbox.send(&command).await?;
            Ok::<_, DebugError>(rx.await.unwrap_or(false))
        };

        match tokio::time::timeout(self.set_line_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("No set-line result within {:?}", self.set_line_timeout);
                Ok(false)
            }
        }
    }

    // Evaluation

    /// Evaluate `text` in `frame`; `completion` runs on the dispatch task when
    /// the result (or exception) arrives.
    pub async fn execute_text_with<F>(
        &self,
        text: &str,
        frame: &StackFrame,
        completion: F,
    ) -> DebugResult<CorrelationId>
    where
        F: FnOnce(EvaluationResult) + Send + 'static,
    {
        let id = self.state.ids.allocate();
        // Registered before the send: the answer may beat the write acknowledgement
        self.state.executes.insert(
            id,
            PendingRequest {
                completion: Box::new(completion),
                expression: text.to_string(),
                frame: frame.clone(),
            },
        );

        let mut command = CommandFrame::new(command_tokens::EXECUTE_TEXT);
        command
            .put_string(text)
            .put_i32(frame.thread_id)
            .put_i32(frame.frame_id)
            .put_i32(id);

        if let Err(e) = self.outbox.send(&command).await {
            if self.state.executes.take(id).is_some() {
                self.state.ids.free(id);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Evaluate `text` in `frame` and wait for the result. Fails with
    /// `ConnectionClosed` if the session ends first.
    pub async fn execute_text(&self, text: &str, frame: &StackFrame) -> DebugResult<EvaluationResult> {
        let (tx, rx) = oneshot::channel();
        self.execute_text_with(text, frame, move |result| {
            tx.send(result).ok();
        })
        .await?;
        rx.await.map_err(|_| DebugError::ConnectionClosed)
    }

    /// List the attributes or items of `expression` in `frame`; `completion`
    /// runs on the dispatch task.
    pub async fn enumerate_children_with<F>(
        &self,
        expression: &str,
        frame: &StackFrame,
        completion: F,
    ) -> DebugResult<CorrelationId>
    where
        F: FnOnce(Vec<EvaluationResult>) + Send + 'static,
    {
        let id = self.state.ids.allocate();
        self.state.children.insert(
            id,
            PendingRequest {
                completion: Box::new(completion),
                expression: expression.to_string(),
                frame: frame.clone(),
            },
        );

        let mut command = CommandFrame::new(command_tokens::ENUM_CHILDREN);
        command
            .put_string(expression)
            .put_i32(frame.thread_id)
            .put_i32(frame.frame_id)
            .put_i32(id);

        if let Err(e) = self.outbox.send(&command).await {
            if self.state.children.take(id).is_some() {
                self.state.ids.free(id);
            }
            return Err(e);
        }
        Ok(id)
    }

    pub async fn enumerate_children(
        &self,
        expression: &str,
        frame: &StackFrame,
    ) -> DebugResult<Vec<EvaluationResult>> {
        let (tx, rx) = oneshot::channel();
        self.enumerate_children_with(expression, frame, move |children| {
            tx.send(children).ok();
        })
        .await?;
        rx.await.map_err(|_| DebugError::ConnectionClosed)
    }

    // Exception policy and REPL

    /// Set the break mode for all exceptions (`default_mode`) and per exception
    /// type. Modes are in `commands::break_modes`.
    pub async fn set_exception_info(
        &self,
        default_mode: i32,
        modes: &[(String, i32)],
    ) -> DebugResult<()> {
        self.outbox
            .send(&exception_info_frame(default_mode, modes))
            .await
    }

    /// Ask the debuggee to open a REPL back to `port`
    pub async fn connect_repl(&self, port: u16) -> DebugResult<()> {
        let mut frame = CommandFrame::new(command_tokens::CONNECT_REPL);
        frame.put_i32(i32::from(port));
        self.outbox.send(&frame).await
    }

    pub async fn disconnect_repl(&self) {
        if let Err(e) = self
            .outbox
            .send(&CommandFrame::new(command_tokens::DISCONNECT_REPL))
            .await
        {
            debug!("REPL disconnect not delivered: {}", e);
        }
    }

    /// Correlation ids currently tied to unanswered requests
    pub fn pending_requests(&self) -> usize {
        self.state.ids.in_use()
    }
}
