// Thread and frame model
//
// Threads appear on NEWT and disappear on EXTT. Their frames are only known after
// a frame list arrives, and a new list always replaces the old one wholesale.

use crate::pathmap::{MapDirection, PathMapper};
use crate::protocol::DebugResult;
use crate::reader::WireReader;
use crate::types::{
    fixup_escaped_unicode, EvaluationResult, EvaluationValue, FrameRef, LanguageVersion,
    StackFrame, ThreadId,
};
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::AsyncRead;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugThread {
    pub id: ThreadId,
    /// Empty until someone names the thread
    pub name: String,
    /// Every thread but the first one created in the session
    pub is_worker: bool,
    /// Last captured frames, innermost first
    pub frames: Option<Vec<StackFrame>>,
}

#[derive(Debug, Default)]
pub struct ThreadMap {
    threads: HashMap<ThreadId, DebugThread>,
    created_first: bool,
}

impl ThreadMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, id: ThreadId) -> DebugThread {
        let thread = DebugThread {
            id,
            name: String::new(),
            is_worker: self.created_first,
            frames: None,
        };
        self.created_first = true;
        self.threads.insert(id, thread.clone());
        thread
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<DebugThread> {
        self.threads.remove(&id)
    }

    pub fn get(&self, id: ThreadId) -> Option<&DebugThread> {
        self.threads.get(&id)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    /// Replace the thread's frames. Returns false for an unknown thread.
    pub fn replace_frames(&mut self, id: ThreadId, frames: Vec<StackFrame>) -> bool {
        match self.threads.get_mut(&id) {
            Some(thread) => {
                thread.frames = Some(frames);
                true
            }
            None => false,
        }
    }

    pub fn rename(&mut self, id: ThreadId, name: &str) -> bool {
        match self.threads.get_mut(&id) {
            Some(thread) => {
                thread.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// All threads ordered by id
    pub fn all(&self) -> Vec<DebugThread> {
        let mut all: Vec<_> = self.threads.values().cloned().collect();
        all.sort_by_key(|t| t.id);
        all
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

/// Read the repr / type name / expandable triple that follows an expression
pub(crate) async fn read_evaluation_value<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    version: LanguageVersion,
) -> DebugResult<EvaluationValue> {
    let repr = reader.read_string_or_empty().await?;
    let type_name = reader.read_string_or_empty().await?;
    let expandable = reader.read_flag().await?;

    let repr = if type_name == version.text_type_name() {
        fixup_escaped_unicode(&repr)
    } else {
        repr
    };

    Ok(EvaluationValue::Value {
        repr,
        type_name,
        expandable,
    })
}

/// Read the body of a frame list (everything after the thread id)
pub(crate) async fn read_frame_list<R: AsyncRead + Unpin>(
    reader: &mut WireReader<R>,
    thread_id: ThreadId,
    version: LanguageVersion,
    paths: &PathMapper,
) -> DebugResult<Vec<StackFrame>> {
    let frame_count = reader.read_i32().await?;
    let mut frames = Vec::with_capacity(frame_count.clamp(0, 256) as usize);

    for frame_id in 0..frame_count {
        let start_line = reader.read_i32().await?;
        let end_line = reader.read_i32().await?;
        let line = reader.read_i32().await?;
        let function_name = reader.read_string_or_empty().await?;
        let filename = reader.read_string_or_empty().await?;
        let arg_count = reader.read_i32().await?;
        let var_count = reader.read_i32().await?;

        let frame = FrameRef {
            thread_id,
            frame_id,
        };
        let mut variables = Vec::with_capacity(var_count.clamp(0, 256) as usize);
        for _ in 0..var_count {
            let name = reader.read_string_or_empty().await?;
            let value = read_evaluation_value(reader, version).await?;
            variables.push(EvaluationResult {
                expression: name,
                child_name: None,
                child_is_index: false,
                frame,
                value,
            });
        }

        frames.push(StackFrame::new(
            thread_id,
            frame_id,
            function_name,
            paths.map(&filename, MapDirection::FromDebuggee),
            start_line,
            end_line,
            line,
            usize::try_from(arg_count).unwrap_or(0),
            variables,
        ));
    }

    Ok(frames)
}
