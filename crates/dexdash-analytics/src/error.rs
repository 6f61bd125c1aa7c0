#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("graphql error: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl AnalyticsError {
    /// Whether the next poll has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::GraphQl(_) | Self::MissingField(_) | Self::Decode(_) => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Network(_) => "network",
            Self::GraphQl(_) => "graphql",
            Self::MissingField(_) => "missing_field",
            Self::Decode(_) => "decode",
        }
    }
}
