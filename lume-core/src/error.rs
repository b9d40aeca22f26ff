use std::fmt;

#[derive(Debug)]
pub enum LumeError {
    ResourceCreationFailed(String),
    ShaderCompilationFailed(String),
    SubmissionFailed(String),
    OutOfBounds { offset: u64, len: u64, size: u64 },
    Timeout,
    BackendError(String),
    OutOfMemory,
    Generic(&'static str),
}

impl fmt::Display for LumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LumeError::ResourceCreationFailed(msg) => write!(f, "Resource Creation Failed: {}", msg),
            LumeError::ShaderCompilationFailed(msg) => write!(f, "Shader Compilation Failed: {}", msg),
            LumeError::SubmissionFailed(msg) => write!(f, "Submission Failed: {}", msg),
            LumeError::OutOfBounds { offset, len, size } => write!(
                f,
                "Out of Bounds: access of {} bytes at offset {} into a buffer of {} bytes",
                len, offset, size
            ),
            LumeError::Timeout => write!(f, "Timed out waiting for fences"),
            LumeError::BackendError(msg) => write!(f, "Backend Error: {}", msg),
            LumeError::OutOfMemory => write!(f, "Out of Memory"),
            LumeError::Generic(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for LumeError {}

pub type LumeResult<T> = Result<T, LumeError>;
