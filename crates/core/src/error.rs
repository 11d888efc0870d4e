use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spreadsheet parse error: {0}")]
    SheetParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("source store write failed for {name}: {reason}")]
    StoreWrite { name: String, reason: String },

    #[error("indexing failed: {0}")]
    Index(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding dimension {actual} != {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("document not found in {index}: {id}")]
    NotFound { index: String, id: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
