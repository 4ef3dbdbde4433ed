use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed JSON in {what}: {source}")]
    JsonParse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {what}: {message}")]
    Invalid { what: String, message: String },

    #[error("domain error: {0}")]
    Domain(#[from] reactor_domain::DomainError),
}
