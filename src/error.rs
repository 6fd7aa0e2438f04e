use thiserror::Error;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("file is not open")]
    NotOpen,
    #[error("a file is already open on this manager")]
    AlreadyOpen,
    #[error("file was opened read-only")]
    ReadOnly,
    #[error("file '{}' is inconsistent (status flag is not clean)", .0.display())]
    Inconsistent(PathBuf),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("filter and record masks share no field")]
    DisjointMasks,
    #[error("corrupt file: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Result codes surfaced to callers of `open`, which map them to their own
/// user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    Ok,
    Failed,
    Inconsistent,
    Empty,
    InvalidArgument,
}

/// Successful outcome of opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    Ready,
    /// The file is consistent but holds no live entries.
    Empty,
}

impl OpenStatus {
    pub fn open_result(self) -> OpenResult {
        match self {
            OpenStatus::Ready => OpenResult::Ok,
            OpenStatus::Empty => OpenResult::Empty,
        }
    }
}

impl DbError {
    /// Classify an error returned by `open`.
    pub fn open_result(&self) -> OpenResult {
        match self {
            DbError::Inconsistent(_) | DbError::Corrupt(_) => OpenResult::Inconsistent,
            DbError::InvalidArgument(_) | DbError::AlreadyOpen => OpenResult::InvalidArgument,
            _ => OpenResult::Failed,
        }
    }
}

/// Convenience used by callers that want the code whatever happened.
pub fn open_result_of(res: &DbResult<OpenStatus>) -> OpenResult {
    match res {
        Ok(status) => status.open_result(),
        Err(e) => e.open_result(),
    }
}
