use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Rate limit exceeded, please try again later")]
    RateLimited,

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Match not found upstream: {0}")]
    MatchNotFound(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Feature extraction failed for {match_id}: {reason}")]
    Extraction { match_id: String, reason: String },

    #[error("Invalid role weights: {0}")]
    InvalidWeights(#[from] WeightsError),

    #[error("Admin access required: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejections raised while validating a role-weights payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightsError {
    #[error("roles map required")]
    Empty,

    #[error("missing role {0}")]
    MissingRole(String),

    #[error("weights for {role} must sum to 1.0 (got {total:.4})")]
    BadSum { role: String, total: f64 },

    #[error("unknown domains {keys:?} for {role}")]
    UnknownDomain { role: String, keys: Vec<String> },
}

impl AppError {
    pub fn extraction(match_id: &str, reason: impl Into<String>) -> Self {
        AppError::Extraction {
            match_id: match_id.to_string(),
            reason: reason.into(),
        }
    }
}
