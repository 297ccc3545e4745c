use thiserror::Error;

pub type Result<T> = std::result::Result<T, PerceptError>;

#[derive(Debug, Error)]
pub enum PerceptError {
    #[error("session is meant to be initialized only once")]
    AlreadyInitialized,
    #[error("session has not been initialized with an experiment label")]
    NotInitialized,
    #[error("cannot insert {reps} trials into a timeline of length {len}")]
    InvalidInterspersal { reps: usize, len: usize },
    #[error("metadata was not set by a previous configuration request")]
    Precondition,
    #[error("server could not be reached at: {url}\n\nError: {message}")]
    Transport { url: String, message: String },
    #[error("server error: {0}")]
    Application(String),
    #[error("the contents of the alternative settings is not valid JSON: {0}")]
    MalformedOverride(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("export failed: {0}")]
    Export(String),
}

impl PerceptError {
    pub fn code(&self) -> &'static str {
        match self {
            PerceptError::AlreadyInitialized => "already_initialized",
            PerceptError::NotInitialized => "not_initialized",
            PerceptError::InvalidInterspersal { .. } => "invalid_interspersal",
            PerceptError::Precondition => "precondition",
            PerceptError::Transport { .. } => "transport",
            PerceptError::Application(_) => "application",
            PerceptError::MalformedOverride(_) => "malformed_override",
            PerceptError::Config(_) => "config",
            PerceptError::Export(_) => "export",
        }
    }
}
