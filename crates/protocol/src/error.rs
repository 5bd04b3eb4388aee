//! Error taxonomy for frame and payload decoding.

/// Errors produced while encoding or decoding a frame.
///
/// Every variant is local to one message: callers log and drop the
/// frame, the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte layout is malformed (bad header, bad length, truncation).
    #[error("malformed frame: {0}")]
    Format(String),

    /// The layout is valid but segment ordering rules are violated.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The JSON segment does not describe a known payload.
    #[error("invalid payload: {0}")]
    Validation(String),
}

impl FrameError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        FrameError::Format(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        FrameError::Protocol(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        FrameError::Validation(msg.into())
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes() {
        assert_eq!(
            FrameError::format("no colon").to_string(),
            "malformed frame: no colon"
        );
        assert_eq!(
            FrameError::protocol("multiple JSON payloads").to_string(),
            "protocol violation: multiple JSON payloads"
        );
        assert!(
            FrameError::validation("missing type")
                .to_string()
                .starts_with("invalid payload")
        );
    }

    #[test]
    fn json_errors_are_validation() {
        let err: FrameError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, FrameError::Validation(_)));
    }
}
