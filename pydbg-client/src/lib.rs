// Python debugger client library
//
// Drives a running interpreter from the tooling side over the debugger's binary
// socket protocol:
// - Attach handshake and session lifetime
// - Breakpoint binding and bind-state tracking
// - Threads, stack frames and variables
// - Expression evaluation and child enumeration
// - Execution control and exception break policy

pub mod attach;
pub mod breakpoint;
pub mod commands;
pub mod config;
pub mod connection;
mod eventloop;
pub mod events;
pub mod exceptions;
pub mod ids;
pub mod pathmap;
pub mod pending;
pub mod protocol;
pub mod reader;
pub mod thread;
pub mod types;

pub use attach::DebugListener;
pub use breakpoint::{BindState, Breakpoint};
pub use config::SessionConfig;
pub use connection::DebugConnection;
pub use eventloop::UNKNOWN_EXIT_CODE;
pub use events::{DebugEvent, SubscriptionId};
pub use exceptions::{ExceptionHandlerSource, HandlerTable, NoHandlerInfo};
pub use pathmap::PathMapping;
pub use protocol::{AttachError, AttachErrorKind, DebugError, DebugResult};
pub use thread::DebugThread;
pub use types::{
    EvaluationResult, EvaluationValue, ExceptionInfo, HandledRange, LanguageVersion, ModuleInfo,
    StackFrame,
};
