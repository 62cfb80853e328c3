use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("plan generator unavailable: {0}")]
    GeneratorUnavailable(String),

    #[error("plan generator timed out after {0}s")]
    GeneratorTimeout(u64),

    #[error("malformed plan output: {0}")]
    MalformedPlan(String),

    #[error("plan failed validation: {0}")]
    InvalidPlan(String),

    #[error("image synthesis failed: {0}")]
    Synthesis(String),

    #[error("captioner error: {0}")]
    Captioner(String),

    #[error("similarity scorer error: {0}")]
    Similarity(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PlannerResult<T> = std::result::Result<T, PlannerError>;
