//! Error types for Pixelcast

use thiserror::Error;

use crate::health::UnhealthyReason;
use crate::session::SessionState;

/// Result type alias using PixelcastError
pub type Result<T> = std::result::Result<T, PixelcastError>;

/// Main error type for Pixelcast operations
///
/// The error is `Clone` because a coalesced start or stop hands the same
/// outcome to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum PixelcastError {
    /// No capture device is connected
    #[error("No capture device available")]
    NoDeviceAvailable,

    /// The device adapter failed to open the media handle
    #[error("Failed to acquire media stream: {0}")]
    AcquisitionFailed(String),

    /// An operation was driven from a state that does not allow it
    #[error("Session is already {0}")]
    AlreadyInState(SessionState),

    /// Releasing the media handle failed (cleanup still proceeds)
    #[error("Failed to release media stream: {0}")]
    ReleaseFailed(String),

    /// The stream opened but the health probe never saw a frame
    #[error("Stream unhealthy: {0}")]
    StreamUnhealthy(UnhealthyReason),

    /// Accelerated renderer could not be initialized
    #[error("Renderer initialization failed: {0}")]
    RenderInitFailed(String),

    /// The presentation surface was transferred and lost
    #[error("Presentation surface unrecoverable: {0}")]
    SurfaceUnrecoverable(String),

    /// The device went away mid-session
    #[error("Capture device disconnected")]
    DeviceDisconnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PixelcastError>,
    },
}

impl PixelcastError {
    /// Create an acquisition error
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::AcquisitionFailed(msg.into())
    }

    /// Create a release error
    pub fn release(msg: impl Into<String>) -> Self {
        Self::ReleaseFailed(msg.into())
    }

    /// Create a renderer initialization error
    pub fn render_init(msg: impl Into<String>) -> Self {
        Self::RenderInitFailed(msg.into())
    }

    /// Create a surface error
    pub fn surface(msg: impl Into<String>) -> Self {
        Self::SurfaceUnrecoverable(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &PixelcastError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Which remediation class a failed start falls into
    pub fn failure_kind(&self) -> FailureKind {
        match self.root() {
            Self::NoDeviceAvailable | Self::DeviceDisconnected => FailureKind::NoDevice,
            Self::StreamUnhealthy(_) => FailureKind::NoFrames,
            _ => FailureKind::Internal,
        }
    }

    /// Single human-readable sentence for a failed start
    pub fn user_message(&self) -> &'static str {
        match self.failure_kind() {
            FailureKind::NoDevice => "No capture device found. Connect the device and try again.",
            FailureKind::NoFrames => {
                "The device is connected but not sending video. Make sure it is powered on."
            }
            FailureKind::Internal => "Something went wrong while starting the stream. Please retry.",
        }
    }

    /// Optional hint for resolving the error
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::NoDeviceAvailable => Some("Check the USB cable and that the capture device is listed by the system"),
            Self::DeviceDisconnected => Some("The capture device was unplugged or lost power; reconnect it and start a new session"),
            Self::StreamUnhealthy(_) => Some("Power on the console or raise [health] timeout_ms in config.toml"),
            Self::RenderInitFailed(_) => Some("Enable performance mode to use the software renderer"),
            Self::SurfaceUnrecoverable(_) => Some("Stop and start the session to recreate the display surface"),
            Self::Config(_) => Some("Check ~/.config/pixelcast/config.toml for syntax errors"),
            _ => None,
        }
    }
}

/// Remediation class shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connect the device
    NoDevice,
    /// Power on the device
    NoFrames,
    /// Retry
    Internal,
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<std::io::Error> for PixelcastError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for PixelcastError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PixelcastError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}
