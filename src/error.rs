//! Error handling for Auris
//!
//! Every failure surfaced by the orchestrator maps to one of these variants.
//! The event surface turns them into `{ok: false, error, code, message}` responses.

use thiserror::Error;

/// Result type alias for Auris operations
pub type Result<T> = std::result::Result<T, AurisError>;

/// Main error type for Auris operations
///
/// Payloads are plain strings so the enum stays `Clone`: a single in-flight
/// pipeline creation hands the same outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AurisError {
    // Capture Errors
    #[error("Cannot capture a tab with an active stream: {target}")]
    AcquisitionConflict { target: String },

    #[error("Capture acquisition failed for {target}: {reason}")]
    AcquisitionFailed { target: String, reason: String },

    #[error("Media unavailable for stream {stream_id}: {reason}")]
    MediaUnavailable { stream_id: String, reason: String },

    // Pipeline Errors
    #[error("Pipeline not initialized")]
    PipelineNotInitialized { stream_id: String },

    #[error("Pipeline creation for {stream_id} was cancelled by teardown")]
    CreationCancelled { stream_id: String },

    #[error("No active streams")]
    NoActiveStreams,

    // Payload Errors
    #[error("Invalid event: {event}")]
    UnknownEvent { event: String },

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // I/O Errors
    #[error("WAV error: {reason}")]
    Wav { reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Serialization error: {details}")]
    Serialization { details: String },
}

impl From<std::io::Error> for AurisError {
    fn from(err: std::io::Error) -> Self {
        AurisError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AurisError {
    fn from(err: serde_json::Error) -> Self {
        AurisError::Serialization {
            details: err.to_string(),
        }
    }
}

impl From<hound::Error> for AurisError {
    fn from(err: hound::Error) -> Self {
        AurisError::Wav {
            reason: err.to_string(),
        }
    }
}

impl AurisError {
    /// Shorthand for an [`AurisError::InvalidPayload`]
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        AurisError::InvalidPayload {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            AurisError::AcquisitionConflict { .. } => "ACQUISITION_CONFLICT",
            AurisError::AcquisitionFailed { .. } => "ACQUISITION_FAILED",
            AurisError::MediaUnavailable { .. } => "MEDIA_UNAVAILABLE",
            AurisError::PipelineNotInitialized { .. } => "PIPELINE_NOT_INITIALIZED",
            AurisError::CreationCancelled { .. } => "CREATION_CANCELLED",
            AurisError::NoActiveStreams => "NO_ACTIVE_STREAMS",
            AurisError::UnknownEvent { .. } => "UNKNOWN_EVENT",
            AurisError::InvalidPayload { .. } => "INVALID_PAYLOAD",
            AurisError::InvalidParameter { .. } => "INVALID_PARAMETER",
            AurisError::Wav { .. } => "WAV_ERROR",
            AurisError::Io { .. } => "IO_ERROR",
            AurisError::Config { .. } => "CONFIG_ERROR",
            AurisError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can succeed on a later attempt without the caller
    /// changing its request (after a retry, cooldown, or `initPipeline`).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AurisError::AcquisitionConflict { .. }
                | AurisError::PipelineNotInitialized { .. }
                | AurisError::CreationCancelled { .. }
                | AurisError::NoActiveStreams
                | AurisError::MediaUnavailable { .. }
        )
    }

    /// Get the status text shown by the UI for this error
    pub fn friendly_message(&self) -> String {
        match self {
            AurisError::AcquisitionConflict { .. } | AurisError::AcquisitionFailed { .. } => {
                "This tab is already being captured. Close other capture sessions and try again."
                    .to_string()
            }
            AurisError::PipelineNotInitialized { .. }
            | AurisError::NoActiveStreams
            | AurisError::MediaUnavailable { .. } => "No audio detected".to_string(),
            AurisError::CreationCancelled { .. }
            | AurisError::UnknownEvent { .. }
            | AurisError::Serialization { .. } => "Communication error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AurisError::PipelineNotInitialized {
            stream_id: "T1".to_string(),
        };
        assert_eq!(err.error_code(), "PIPELINE_NOT_INITIALIZED");
        assert_eq!(err.to_string(), "Pipeline not initialized");

        let err = AurisError::UnknownEvent {
            event: "explode".to_string(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_EVENT");
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(AurisError::AcquisitionConflict {
            target: "7".to_string()
        }
        .is_recoverable());
        assert!(AurisError::NoActiveStreams.is_recoverable());
        assert!(!AurisError::invalid_payload("bad eq").is_recoverable());
        assert!(!AurisError::AcquisitionFailed {
            target: "7".to_string(),
            reason: "denied".to_string(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_friendly_messages() {
        assert_eq!(
            AurisError::NoActiveStreams.friendly_message(),
            "No audio detected"
        );
        assert_eq!(
            AurisError::UnknownEvent {
                event: "x".to_string()
            }
            .friendly_message(),
            "Communication error"
        );
        let payload = AurisError::invalid_payload("Invalid EQ update payload");
        assert_eq!(
            payload.friendly_message(),
            "Invalid payload: Invalid EQ update payload"
        );
    }

    #[test]
    fn test_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AurisError = io.into();
        assert_eq!(err.error_code(), "IO_ERROR");

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: AurisError = json.into();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
