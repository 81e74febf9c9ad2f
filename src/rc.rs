use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DbError>;

/// Uniform error code for every fallible operation in the engine.
///
/// Parse and bind failures carry enough text to report to the client;
/// storage codes are matched on by the executors (duplicate key, invisible
/// record and so on), so they stay data-free where possible.
#[derive(Error, Debug)]
pub enum DbError {
    // Parse / bind.
    #[error("syntax error at line {line} column {column}: {msg}")]
    SqlSyntax { line: usize, column: usize, msg: String },
    #[error("table does not exist: {0}")]
    TableNotExist(String),
    #[error("field does not exist: {0}")]
    FieldNotExist(String),
    #[error("field missing: {0}")]
    FieldMissing(String),
    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Storage.
    #[error("record does not exist")]
    RecordNotExist,
    #[error("invalid record id")]
    RecordInvalidRid,
    #[error("no space for record")]
    RecordNomem,
    #[error("duplicate key")]
    RecordDuplicateKey,
    #[error("record invisible to transaction")]
    RecordInvisible,
    #[error("end of records")]
    RecordEof,
    #[error("record file already opened")]
    RecordOpened,

    // I/O.
    #[error("failed to open file {path}: {source}")]
    IoOpen { path: String, source: std::io::Error },
    #[error("read failed: {0}")]
    IoRead(std::io::Error),
    #[error("write failed: {0}")]
    IoWrite(std::io::Error),
    #[error("out of memory")]
    Nomem,

    // Control.
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Shorthand for an internal error with a formatted message.
    pub fn internal(msg: impl Into<String>) -> DbError {
        DbError::Internal(msg.into())
    }
}
