use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoothError {
    #[error("Camera error: {0}")]
    Camera(String),
    #[error("Printer error: {0}")]
    Printer(String),
    #[error("Input device error: {0}")]
    Input(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Metadata error: {0}")]
    Metadata(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

impl BoothError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        BoothError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BoothError::InvalidArgument(message.into())
    }

    /// True for errors a caller can recover from by fixing its request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BoothError::InvalidArgument(_) | BoothError::NotFound { .. }
        )
    }
}

impl From<serde_json::Error> for BoothError {
    fn from(e: serde_json::Error) -> Self {
        BoothError::Metadata(e.to_string())
    }
}
