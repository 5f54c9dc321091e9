use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("stream open failed: {0}")]
    OpenFailed(String),
    #[error("stream closed: {0}")]
    StreamClosed(String),
    #[error("recognizer rejected audio: {0}")]
    BadAudio(String),
    #[error("recognizer unavailable")]
    Unavailable,
}

/// 恒久エラーか一時エラーかの分類。恒久は再試行しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Permanent,
    Transient,
}

impl RecognitionError {
    pub fn classify(&self) -> FailureClass {
        let text = self.to_string().to_ascii_lowercase();
        const PERMANENT_MARKERS: &[&str] = &[
            "credential",
            "permission",
            "unauthenticated",
            "unauthorized",
            "not found",
            "invalid argument",
        ];
        if PERMANENT_MARKERS.iter().any(|m| text.contains(m)) {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        }
    }
}

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("text too long")]
    TextTooLong,
    #[error("service unavailable")]
    ServiceUnavailable,
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("console post failed: {0}")]
    PostFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_are_permanent() {
        let err = RecognitionError::OpenFailed("invalid credentials supplied".to_string());
        assert_eq!(err.classify(), FailureClass::Permanent);
        let err = RecognitionError::StreamClosed("PERMISSION_DENIED: caller".to_string());
        assert_eq!(err.classify(), FailureClass::Permanent);
    }

    #[test]
    fn network_errors_are_transient() {
        let err = RecognitionError::StreamClosed("connection reset by peer".to_string());
        assert_eq!(err.classify(), FailureClass::Transient);
        assert_eq!(
            RecognitionError::Unavailable.classify(),
            FailureClass::Transient
        );
    }
}
