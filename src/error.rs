use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResearchError>;

/// Failures surfaced by the pipeline stages.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// Connection failed or the request timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// An external API answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// A response (or a stored file) did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage was invoked before its inputs exist, e.g. reporting
    /// with an empty results store.
    #[error("{0}")]
    Precondition(String),
}

impl ResearchError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::Transport(_) => "transport",
            ResearchError::HttpStatus { .. } => "http-status",
            ResearchError::MalformedResponse(_) => "malformed-response",
            ResearchError::Io(_) => "io",
            ResearchError::Precondition(_) => "precondition",
        }
    }
}

/// Cap response bodies carried inside errors so the audit log stays readable.
pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}
