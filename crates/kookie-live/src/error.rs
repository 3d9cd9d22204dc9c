//! Error types for the Kookie live session engine

use thiserror::Error;

/// Result type alias for live session operations
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors that can occur while running a live voice session
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio device busy: {0}")]
    DeviceBusy(String),

    #[error("Session configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Invalid tool argument: {0}")]
    InvalidToolArgument(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Copyable classification of a [`LiveError`], carried by session notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    Configuration,
    Transport,
    Decode,
    InvalidToolArgument,
    Playback,
}

impl LiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            LiveError::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            LiveError::DeviceBusy(_) => ErrorKind::DeviceBusy,
            LiveError::Configuration(_) => ErrorKind::Configuration,
            LiveError::Transport(_) => ErrorKind::Transport,
            LiveError::Decode(_) | LiveError::Json(_) => ErrorKind::Decode,
            LiveError::InvalidToolArgument(_) => ErrorKind::InvalidToolArgument,
            LiveError::Playback(_) => ErrorKind::Playback,
        }
    }

    /// True for the errors raised while a session is being set up.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PermissionDenied
                | ErrorKind::DeviceNotFound
                | ErrorKind::DeviceBusy
                | ErrorKind::Configuration
        )
    }

    /// Actionable text for the end user.
    pub fn user_message(&self) -> String {
        match self {
            LiveError::PermissionDenied(_) => "Microphone access was denied. Allow microphone access for this application and try again.".to_string(),
            LiveError::DeviceNotFound(_) => "No microphone was found. Connect a microphone and try again.".to_string(),
            LiveError::DeviceBusy(_) => "The microphone is being used by another application. Close other applications using the microphone and try again.".to_string(),
            LiveError::Configuration(detail) => format!("The session could not be set up ({}). Check the API key and model settings.", detail),
            LiveError::Transport(_) => "The connection to the companion was lost. Start the conversation again.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Classify a backend-specific device message. Backends report permission
/// problems only through their description text.
fn classify_backend(description: String) -> LiveError {
    let lower = description.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        LiveError::PermissionDenied(description)
    } else if lower.contains("busy") || lower.contains("in use") || lower.contains("exclusive") {
        LiveError::DeviceBusy(description)
    } else {
        LiveError::Configuration(description)
    }
}

impl From<cpal::DevicesError> for LiveError {
    fn from(err: cpal::DevicesError) -> Self {
        match err {
            cpal::DevicesError::BackendSpecific { err } => classify_backend(err.description),
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for LiveError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => LiveError::DeviceNotFound(err.to_string()),
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => LiveError::Configuration(err.to_string()),
            cpal::DefaultStreamConfigError::BackendSpecific { err } => classify_backend(err.description),
        }
    }
}

impl From<cpal::BuildStreamError> for LiveError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => LiveError::DeviceBusy(err.to_string()),
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => LiveError::Configuration(err.to_string()),
            cpal::BuildStreamError::BackendSpecific { err } => classify_backend(err.description),
            other => LiveError::Configuration(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for LiveError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => LiveError::DeviceBusy(err.to_string()),
            cpal::PlayStreamError::BackendSpecific { err } => classify_backend(err.description),
        }
    }
}

/// A 4xx handshake rejection means the key or model was refused, not that the link failed.
impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) if response.status().is_client_error() => {
                let body = response
                    .body()
                    .as_deref()
                    .map(|b| String::from_utf8_lossy(b).trim().to_string())
                    .filter(|b| !b.is_empty());
                let status = response.status();
                LiveError::Configuration(match body {
                    Some(body) => format!("handshake rejected with {}: {}", status, body),
                    None => format!("handshake rejected with {}", status),
                })
            }
            other => LiveError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_permission_text_maps_to_permission_denied() {
        let err = classify_backend("Access denied by the system".to_string());
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.is_setup_error());
    }

    #[test]
    fn backend_busy_text_maps_to_device_busy() {
        let err = classify_backend("device is in use by another process".to_string());
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);
    }

    #[test]
    fn cpal_unavailable_device_is_busy() {
        let err: LiveError = cpal::BuildStreamError::DeviceNotAvailable.into();
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);
    }

    fn handshake_error(status: u16) -> tokio_tungstenite::tungstenite::Error {
        use tokio_tungstenite::tungstenite::http::Response;
        let response = Response::builder()
            .status(status)
            .body(Some(b"API key not valid".to_vec()))
            .unwrap();
        tokio_tungstenite::tungstenite::Error::Http(response)
    }

    #[test]
    fn rejected_handshake_is_a_configuration_error() {
        let err: LiveError = handshake_error(403).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("API key not valid"));
        assert!(err.user_message().contains("Check the API key and model settings"));
    }

    #[test]
    fn server_side_handshake_failure_stays_transport() {
        let err: LiveError = handshake_error(503).into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn setup_errors_have_distinct_user_messages() {
        let messages = [
            LiveError::PermissionDenied(String::new()).user_message(),
            LiveError::DeviceNotFound(String::new()).user_message(),
            LiveError::DeviceBusy(String::new()).user_message(),
            LiveError::Configuration("no key".into()).user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(!LiveError::Transport("closed".into()).is_setup_error());
    }
}
