use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrashfixError {
    #[error("not initialized: run 'crashfix init'")]
    NotInitialized,

    #[error("another crashfix instance is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("invalid request id '{0}': must be lowercase alphanumeric with underscores")]
    InvalidRequestId(String),

    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("fix proposal path '{0}' escapes the repository root")]
    InvalidFixPath(String),

    #[error("approval record not found: {0}")]
    ApprovalNotFound(String),

    #[error("approval for {id} is '{status}', expected '{expected}'")]
    ApprovalWrongStatus {
        id: String,
        status: String,
        expected: String,
    },

    #[error("timed out waiting for analysis response for {0}")]
    Timeout(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("git {op} failed: {detail}")]
    GitFailed { op: String, detail: String },

    #[error("failed to spawn '{program}': {detail}")]
    SpawnFailed { program: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CrashfixError>;
