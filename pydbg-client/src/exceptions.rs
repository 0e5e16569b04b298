// Exception break policy
//
// Which exceptions stop the debuggee (`sexi`), and which source lines already sit
// inside a handler for a given exception (`REQH` request, `sehi` reply). The
// debuggee uses the latter to decide whether an exception counts as unhandled.

use crate::commands::command_tokens;
use crate::protocol::CommandFrame;
use crate::types::HandledRange;
use std::collections::HashMap;

/// Answers the debuggee's question "which try blocks cover lines of this file".
/// Called on the dispatch task, so implementations must return promptly.
pub trait ExceptionHandlerSource: Send + Sync {
    fn handled_ranges(&self, filename: &str) -> Vec<HandledRange>;
}

/// Reports no handlers for any file
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandlerInfo;

impl ExceptionHandlerSource for NoHandlerInfo {
    fn handled_ranges(&self, _filename: &str) -> Vec<HandledRange> {
        Vec::new()
    }
}

/// Fixed ranges per file, keyed by local path
#[derive(Debug, Default, Clone)]
pub struct HandlerTable {
    ranges: HashMap<String, Vec<HandledRange>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, ranges: Vec<HandledRange>) {
        self.ranges.insert(filename.into(), ranges);
    }
}

impl ExceptionHandlerSource for HandlerTable {
    fn handled_ranges(&self, filename: &str) -> Vec<HandledRange> {
        self.ranges.get(filename).cloned().unwrap_or_default()
    }
}

/// `sexi`: default mode, then one (mode, name) pair per listed exception type
pub(crate) fn exception_info_frame(default_mode: i32, modes: &[(String, i32)]) -> CommandFrame {
    let mut frame = CommandFrame::new(command_tokens::SET_EXCEPTION_INFO);
    frame.put_i32(default_mode).put_i32(modes.len() as i32);
    for (name, mode) in modes {
        frame.put_i32(*mode).put_string(name);
    }
    frame
}

/// `sehi`: each range is start, end, its expressions, then a `-` terminator
pub(crate) fn handler_info_frame(filename: &str, ranges: &[HandledRange]) -> CommandFrame {
    let mut frame = CommandFrame::new(command_tokens::SET_EXCEPTION_HANDLER_INFO);
    frame.put_string(filename).put_i32(ranges.len() as i32);
    for range in ranges {
        frame.put_i32(range.start_line).put_i32(range.end_line);
        for expression in &range.expressions {
            frame.put_string(expression);
        }
        frame.put_string("-");
    }
    frame
}
