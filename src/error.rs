// src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid remote URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{message}")]
    Remote { status: u16, message: String }, // message is surfaced to the user as-is
    #[error("Unexpected row shape: {0}")]
    Decode(String),
    #[error("Remote store is not configured (set remote.url and remote.anon_key)")]
    NotConfigured,
}

#[derive(Debug, Error, PartialEq)]
pub enum CsvError {
    #[error("Unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: usize },
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),
    #[error("No {kind} record with id {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("Terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("TUI error: {0}")]
    Tui(#[from] TuiError),
    #[error("CLI error: {0}")]
    Cli(String),
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type VaultResult<T> = Result<T, VaultError>;
