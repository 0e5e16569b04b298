// Wire tokens
//
// Every message starts with a 4-byte ASCII token. Outbound tokens are lower case,
// inbound (debuggee -> tooling) tokens are upper case. The token alone decides how
// many further fields follow.

pub type Token = [u8; 4];

/// Render a token for logging; non-ASCII bytes are escaped
pub fn token_name(token: &Token) -> String {
    token.escape_ascii().to_string()
}

// Commands sent to the debuggee
pub mod command_tokens {
    use super::Token;

    pub const EXIT: Token = *b"exit";
    pub const STEP_INTO: Token = *b"stpi";
    pub const STEP_OUT: Token = *b"stpo";
    pub const STEP_OVER: Token = *b"stpv";
    pub const BREAK_ALL: Token = *b"brka";
    pub const SET_BREAKPOINT: Token = *b"brkp";
    pub const SET_BREAKPOINT_CONDITION: Token = *b"brkc";
    pub const REMOVE_BREAKPOINT: Token = *b"brkr";
    pub const RESUME_ALL: Token = *b"resa";
    pub const GET_THREAD_FRAMES: Token = *b"thrf";
    pub const EXECUTE_TEXT: Token = *b"exec";
    pub const RESUME_THREAD: Token = *b"rest";
    pub const CLEAR_STEPPING: Token = *b"clst";
    pub const SET_LINE_NUMBER: Token = *b"setl";
    pub const ENUM_CHILDREN: Token = *b"chld";
    pub const DETACH: Token = *b"detc";
    pub const SET_EXCEPTION_INFO: Token = *b"sexi";
    pub const SET_EXCEPTION_HANDLER_INFO: Token = *b"sehi";
    pub const CONNECT_REPL: Token = *b"crep";
    pub const DISCONNECT_REPL: Token = *b"drep";
}

// Messages received from the debuggee
pub mod event_tokens {
    use super::Token;

    pub const EXCEPTION: Token = *b"EXCP";
    pub const BREAKPOINT_HIT: Token = *b"BRKH";
    pub const THREAD_CREATE: Token = *b"NEWT";
    pub const THREAD_EXIT: Token = *b"EXTT";
    pub const MODULE_LOAD: Token = *b"MODL";
    pub const STEP_DONE: Token = *b"STPD";
    pub const PROCESS_EXIT: Token = *b"EXIT";
    pub const BREAKPOINT_SET: Token = *b"BRKS";
    pub const BREAKPOINT_FAILED: Token = *b"BRKF";
    pub const PROCESS_LOAD: Token = *b"LOAD";
    pub const THREAD_FRAME_LIST: Token = *b"THRF";
    pub const EXECUTION_RESULT: Token = *b"EXCR";
    pub const EXECUTION_EXCEPTION: Token = *b"EXCE";
    pub const ASYNC_BREAK: Token = *b"ASBR";
    pub const SET_LINE_RESULT: Token = *b"SETL";
    pub const ENUM_CHILDREN: Token = *b"CHLD";
    pub const DEBUGGER_OUTPUT: Token = *b"OUTP";
    pub const REQUEST_HANDLERS: Token = *b"REQH";
    pub const DETACH: Token = *b"DETC";
}

// String encoding flags that prefix every inbound string
pub mod string_flags {
    pub const NULL: u8 = b'N';
    pub const UTF8: u8 = b'U';
    pub const ASCII: u8 = b'A';
}

// Exception break modes used by `sexi`
pub mod break_modes {
    pub const NEVER: i32 = 0;
    pub const ALWAYS: i32 = 1;
    pub const UNHANDLED: i32 = 32;
}
