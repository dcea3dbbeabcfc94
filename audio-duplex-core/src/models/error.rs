use thiserror::Error;

/// Errors surfaced by the audio core.
///
/// Activation and format failures are fatal to the session instance that hit
/// them; a fresh `start()` retries from scratch. `BackendCall` covers
/// transient per-cycle device errors that the loops log and skip.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("no audio endpoint available")]
    DeviceNotAvailable,

    #[error("device activation failed: {0}")]
    ActivationFailed(String),

    #[error("format rejected: {0}")]
    FormatRejected(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{call} failed: {detail}")]
    BackendCall { call: &'static str, detail: String },

    #[error("session is not running")]
    NotRunning,

    #[error("storage error: {0}")]
    Storage(String),
}

impl AudioError {
    /// Create a transient backend-call error.
    pub fn backend(call: &'static str, detail: impl Into<String>) -> Self {
        Self::BackendCall {
            call,
            detail: detail.into(),
        }
    }

    /// True for errors a processing loop may log and skip rather than
    /// escalating to a fault.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendCall { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_are_transient() {
        assert!(AudioError::backend("GetBuffer", "0x88890004").is_transient());
        assert!(!AudioError::DeviceNotAvailable.is_transient());
        assert!(!AudioError::ActivationFailed("denied".into()).is_transient());
    }

    #[test]
    fn display_includes_call_name() {
        let e = AudioError::backend("GetCurrentPadding", "device removed");
        assert_eq!(e.to_string(), "GetCurrentPadding failed: device removed");
    }
}
