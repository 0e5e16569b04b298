// Debugger type definitions
//
// Common types shared by the session, the dispatch loop and the event surface

use serde::{Deserialize, Serialize};
use std::fmt;

// Debuggee-assigned ids are 4-byte integers on the wire
pub type ThreadId = i32;
pub type BreakpointId = i32;
pub type CorrelationId = i32;
pub type ModuleId = i32;

/// Interpreter version reported by the attach collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageVersion {
    V24,
    V25,
    V26,
    V27,
    V30,
    V31,
    V32,
    V33,
}

impl LanguageVersion {
    /// Parse a `major.minor` tag such as `"2.7"` or `"3.3"`
    pub fn parse(tag: &str) -> Option<Self> {
        let mut parts = tag.trim().split('.');
        let major = parts.next()?.parse::<u32>().ok()?;
        let minor = parts.next()?.parse::<u32>().ok()?;

        match (major, minor) {
            (2, 4) => Some(Self::V24),
            (2, 5) => Some(Self::V25),
            (2, 6) => Some(Self::V26),
            (2, 7) => Some(Self::V27),
            (3, 0) => Some(Self::V30),
            (3, 1) => Some(Self::V31),
            (3, 2) => Some(Self::V32),
            (3, 3) => Some(Self::V33),
            _ => None,
        }
    }

    pub fn is_2x(self) -> bool {
        matches!(self, Self::V24 | Self::V25 | Self::V26 | Self::V27)
    }

    pub fn is_3x(self) -> bool {
        !self.is_2x()
    }

    /// Type name whose repr may contain escaped non-ASCII characters
    pub(crate) fn text_type_name(self) -> &'static str {
        if self.is_2x() {
            "unicode"
        } else {
            "str"
        }
    }
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::V24 => "2.4",
            Self::V25 => "2.5",
            Self::V26 => "2.6",
            Self::V27 => "2.7",
            Self::V30 => "3.0",
            Self::V31 => "3.1",
            Self::V32 => "3.2",
            Self::V33 => "3.3",
        };
        f.write_str(tag)
    }
}

/// Identifies the frame an evaluation ran in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRef {
    pub thread_id: ThreadId,
    pub frame_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EvaluationValue {
    Value {
        repr: String,
        type_name: String,
        expandable: bool,
    },
    Exception {
        text: String,
    },
}

/// Result of evaluating an expression (or enumerating one child) in a frame.
/// Children are not embedded; fetch them with `enumerate_children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Expression that produced this result, or the parent expression for a child
    pub expression: String,
    /// Attribute name or index of a child, relative to `expression`
    pub child_name: Option<String>,
    pub child_is_index: bool,
    pub frame: FrameRef,
    pub value: EvaluationValue,
}

impl EvaluationResult {
    pub fn string_repr(&self) -> Option<&str> {
        match &self.value {
            EvaluationValue::Value { repr, .. } => Some(repr),
            EvaluationValue::Exception { .. } => None,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match &self.value {
            EvaluationValue::Value { type_name, .. } => Some(type_name),
            EvaluationValue::Exception { .. } => None,
        }
    }

    pub fn is_expandable(&self) -> bool {
        matches!(
            self.value,
            EvaluationValue::Value {
                expandable: true,
                ..
            }
        )
    }

    pub fn exception_text(&self) -> Option<&str> {
        match &self.value {
            EvaluationValue::Exception { text } => Some(text),
            EvaluationValue::Value { .. } => None,
        }
    }

    /// Expression that re-evaluates to this value: `a.b` for attributes, `a[0]` for indices
    pub fn full_expression(&self) -> String {
        match &self.child_name {
            None => self.expression.clone(),
            Some(child) if self.child_is_index => format!("{}[{}]", self.expression, child),
            Some(child) => format!("{}.{}", self.expression, child),
        }
    }
}

/// Snapshot of one stack level. Replaced, never mutated, when a new frame list arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub thread_id: ThreadId,
    /// Position in the stack, 0 = innermost
    pub frame_id: i32,
    pub function_name: String,
    pub filename: String,
    pub start_line: i32,
    pub end_line: i32,
    pub line: i32,
    arg_count: usize,
    variables: Vec<EvaluationResult>,
}

impl StackFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: ThreadId,
        frame_id: i32,
        function_name: String,
        filename: String,
        start_line: i32,
        end_line: i32,
        line: i32,
        arg_count: usize,
        variables: Vec<EvaluationResult>,
    ) -> Self {
        let arg_count = arg_count.min(variables.len());
        Self {
            thread_id,
            frame_id,
            function_name,
            filename,
            start_line,
            end_line,
            line,
            arg_count,
            variables,
        }
    }

    pub fn frame_ref(&self) -> FrameRef {
        FrameRef {
            thread_id: self.thread_id,
            frame_id: self.frame_id,
        }
    }

    pub fn arguments(&self) -> &[EvaluationResult] {
        &self.variables[..self.arg_count]
    }

    pub fn locals(&self) -> &[EvaluationResult] {
        &self.variables[self.arg_count..]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub description: String,
}

/// Lines covered by a `try` statement and the exception expressions its handlers catch.
/// `*` stands for a bare `except:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandledRange {
    pub start_line: i32,
    pub end_line: i32,
    pub expressions: Vec<String>,
}

/// Decode `\uXXXX` and `\UXXXXXXXX` escapes left in a text repr.
/// Other escapes (and malformed ones) are kept as written.
pub fn fixup_escaped_unicode(repr: &str) -> String {
    let mut out = String::with_capacity(repr.len());
    let mut rest = repr;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let width = match tail.as_bytes().get(1) {
            Some(b'u') => 4,
            Some(b'U') => 8,
            Some(_) => {
                // Keep the escaped character verbatim so `\\u` stays literal
                let next = tail[1..].chars().next().map_or(0, char::len_utf8);
                out.push_str(&tail[..1 + next]);
                rest = &tail[1 + next..];
                continue;
            }
            None => {
                out.push('\\');
                rest = &tail[1..];
                continue;
            }
        };

        let decoded = tail
            .get(2..2 + width)
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[2 + width..];
            }
            None => {
                out.push_str(&tail[..2]);
                rest = &tail[2..];
            }
        }
    }

    out.push_str(rest);
    out
}
