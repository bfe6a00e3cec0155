use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("maps provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("maps provider did not finish loading in time")]
    InitializationTimeout,
    #[error("places capability is not enabled for this key")]
    CapabilityNotEnabled,
    #[error("maps request denied for this key")]
    AuthorizationDenied,
    #[error("maps key is blocked for this target")]
    AccessBlocked,
    #[error("place not found")]
    NotFound,
    #[error("place details request denied")]
    RequestDenied,
    #[error("invalid coordinates")]
    InvalidCoordinates,
    #[error("maps service state corrupted")]
    StateCorrupted,
    #[error("{0}")]
    Unclassified(String),
}

impl ServiceError {
    pub fn classify_init(message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("timeout") || lowered.contains("timed out") {
            Self::InitializationTimeout
        } else if message.contains("ApiNotActivatedMapError")
            || lowered.contains("places library not available")
        {
            Self::CapabilityNotEnabled
        } else if message.contains("ApiTargetBlockedMapError") {
            Self::AccessBlocked
        } else if message.contains("RequestDeniedMapError") || message.contains("REQUEST_DENIED") {
            Self::AuthorizationDenied
        } else {
            Self::Unclassified(message.to_string())
        }
    }

    pub fn from_app_error(err: &AppError) -> Self {
        match err {
            AppError::Service(inner) => inner.clone(),
            AppError::Http(inner) if inner.is_timeout() => Self::InitializationTimeout,
            AppError::Provider(message) | AppError::Config(message) => {
                Self::classify_init(message)
            }
            other => Self::Unclassified(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitializationTimeout => "initialization_timeout",
            Self::CapabilityNotEnabled => "capability_not_enabled",
            Self::AuthorizationDenied => "authorization_denied",
            Self::AccessBlocked => "access_blocked",
            Self::NotFound => "not_found",
            Self::RequestDenied => "request_denied",
            Self::InvalidCoordinates => "invalid_coordinates",
            Self::StateCorrupted => "state_corrupted",
            Self::Unclassified(_) => "unclassified",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InitializationTimeout => {
                "Google Maps API loading timed out. Check your internet connection and try again."
                    .into()
            }
            Self::CapabilityNotEnabled => {
                "Places API not enabled. Please enable it in Google Cloud Console.".into()
            }
            Self::AuthorizationDenied => {
                "API request denied. Check if billing is enabled in Google Cloud Console.".into()
            }
            Self::AccessBlocked => {
                "API key blocked for this application. Try creating a new API key.".into()
            }
            Self::NotFound => "Place not found.".into(),
            Self::RequestDenied => "Place details request denied.".into(),
            Self::InvalidCoordinates => "Invalid coordinates for selected place".into(),
            Self::StateCorrupted => "Maps service needs to restart. Please try again.".into(),
            Self::Unclassified(detail) => format!("Maps service error: {detail}"),
        }
    }
}
