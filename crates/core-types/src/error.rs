use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Unknown {kind} value: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

impl CoreError {
    /// The human-readable part, without the field name.
    pub fn message(&self) -> String {
        match self {
            CoreError::InvalidInput(_, message) => message.clone(),
            other => other.to_string(),
        }
    }
}
