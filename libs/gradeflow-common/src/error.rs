use thiserror::Error;

/// Failure taxonomy for one execution against the execution service.
///
/// All variants are surfaced to the caller; nothing is retried at this
/// level. Retry policy belongs to whoever holds the submission.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("execution service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("execution did not finish within {waited_ms} ms")]
    ExecutionTimeout { waited_ms: u64 },

    #[error("malformed response from execution service: {0}")]
    MalformedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ExecutionError::UnsupportedLanguage("cobol".to_string());
        assert_eq!(err.to_string(), "unsupported language: cobol");

        let err = ExecutionError::ExecutionTimeout { waited_ms: 30000 };
        assert_eq!(err.to_string(), "execution did not finish within 30000 ms");
    }
}
