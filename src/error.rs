use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid query: {0}")]
    Validation(String),
    #[error("Result too large: {0} rows exceed the limit of 5000")]
    TooLarge(usize),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, InsightError>;

// Helper conversions
impl From<std::io::Error> for InsightError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
impl From<serde_json::Error> for InsightError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
