use thiserror::Error;

/// Why a query (or a catalog switch) could not be served.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("No active model is configured")]
    NoActiveModel,

    /// Transport or runtime failure talking to the model runtime.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_displays_id() {
        let error = QueryError::UnknownModel("gpt-9".to_string());
        assert_eq!(error.to_string(), "Unknown model: gpt-9");
    }

    #[test]
    fn model_unavailable_displays_cause() {
        let error = QueryError::ModelUnavailable("connection refused".to_string());
        assert!(error.to_string().contains("connection refused"));
    }
}
