pub mod fs_atomic;
pub mod redact;
pub mod shell;
pub mod suggest;
pub mod text;
pub mod tool_errors;
