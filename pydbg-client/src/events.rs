// Session events
//
// Raised by the dispatch task for inbound debuggee messages. Subscribers are
// invoked on the dispatch task in arrival order and must not block: nothing else
// is read off the socket until every handler has returned.

use crate::breakpoint::Breakpoint;
use crate::types::*;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DebugEvent {
    /// Process started and is stopped before any user code runs
    ProcessLoaded {
        thread: ThreadId,
    },
    ThreadCreated {
        thread: ThreadId,
    },
    ThreadExited {
        thread: ThreadId,
    },
    StepComplete {
        thread: ThreadId,
    },
    AsyncBreakComplete {
        thread: ThreadId,
    },
    ProcessExited {
        exit_code: i32,
    },
    ModuleLoaded {
        module: ModuleInfo,
    },
    ExceptionRaised {
        thread: ThreadId,
        exception: ExceptionInfo,
    },
    BreakpointHit {
        breakpoint: Breakpoint,
        thread: ThreadId,
    },
    BreakpointBindSucceeded {
        breakpoint: Breakpoint,
    },
    BreakpointBindFailed {
        breakpoint: Breakpoint,
    },
    DebuggerOutput {
        thread: ThreadId,
        output: String,
    },
}

pub type EventHandler = Arc<dyn Fn(&DebugEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Multicast subscriber list. Has its own lock, separate from session state.
#[derive(Default)]
pub struct Subscribers {
    handlers: Mutex<Vec<(SubscriptionId, EventHandler)>>,
    next_id: AtomicU64,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, handler));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Forward every event into an unbounded channel. The subscription lapses
    /// once the receiver is dropped and the next event finds it closed.
    pub fn channel(self: &Arc<Self>) -> mpsc::UnboundedReceiver<DebugEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let owner = Arc::downgrade(self);
        let slot_for_handler = slot.clone();

        let id = self.subscribe(Arc::new(move |event: &DebugEvent| {
            if tx.send(event.clone()).is_err() {
                debug!("Event receiver dropped, removing forwarding subscriber");
                if let (Some(owner), Some(id)) = (owner.upgrade(), *slot_for_handler.lock()) {
                    owner.unsubscribe(id);
                }
            }
        }));
        *slot.lock() = Some(id);
        rx
    }

    /// Invoke every handler with `event`. Handlers are called outside the lock,
    /// so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &DebugEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
