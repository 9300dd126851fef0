use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("Insufficient data for {item}: need at least {required} rows, got {actual}")]
    InsufficientData {
        item: String,
        required: usize,
        actual: usize,
    },

    #[error("{model} model failed to fit: {reason}")]
    ModelFit { model: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ForecastError {
    pub fn model_fit(model: &'static str, reason: impl Into<String>) -> Self {
        ForecastError::ModelFit {
            model,
            reason: reason.into(),
        }
    }

    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, ForecastError::InsufficientData { .. })
    }
}
