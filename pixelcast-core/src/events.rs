//! Session events broadcast to UI collaborators

use serde::Serialize;

use crate::error::PixelcastError;
use crate::render::ShaderPreset;
use crate::session::SessionInfo;
use crate::types::{Handle, RenderMode};

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop request
    User,
    /// Stopped so a new start could proceed
    Restart,
    /// The device went away
    DeviceLost,
    /// The display surface could not be recovered
    RenderFailure,
    /// Cleanup after a failed start
    Cleanup,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Restart => write!(f, "restart"),
            Self::DeviceLost => write!(f, "device lost"),
            Self::RenderFailure => write!(f, "render failure"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Everything the session reports to observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session reached Streaming
    SessionStarted(SessionInfo),
    /// Session returned to Idle
    SessionStopped { session: Handle, reason: StopReason },
    /// A failure observers should surface (start failures, device loss,
    /// release problems)
    SessionError {
        session: Option<Handle>,
        error: PixelcastError,
    },
    /// The accelerated worker died and its surface was replaced
    SurfaceExpired { surface: Handle, reason: String },
    /// Renderer or preset changed
    RenderModeChanged { mode: RenderMode, preset: ShaderPreset },
}

impl SessionEvent {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted(_) => "session-started",
            Self::SessionStopped { .. } => "session-stopped",
            Self::SessionError { .. } => "session-error",
            Self::SurfaceExpired { .. } => "surface-expired",
            Self::RenderModeChanged { .. } => "render-mode-changed",
        }
    }
}
