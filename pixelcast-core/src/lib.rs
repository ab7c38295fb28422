//! Pixelcast Core Library
//!
//! Live capture-card viewer core: stream lifecycle and adaptive rendering.
//!
//! This library provides:
//! - A stream session state machine with coalesced start/stop
//! - A health probe that detects devices which open but never send video
//! - Accelerated (worker-thread) and software renderers with automatic
//!   fallback and mid-session switching
//! - Pixel-perfect integer viewport scaling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │ DeviceAdapter   │───▶│ StreamSession│───▶│ RenderPipeline  │
//! │ (media handle)  │    │ (lifecycle)  │    │ (accel / soft)  │
//! └─────────────────┘    └──────────────┘    └─────────────────┘
//!                               │                     │
//!                          HealthMonitor     CapabilityProbe + ViewportScaler
//! ```

pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gpu;
pub mod health;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod surface;
pub mod types;
pub mod viewport;

pub use capability::{CapabilityProbe, CapabilityReport, GraphicsBackend, RenderTier};
pub use config::{PerformanceStrategy, Settings, SettingsProvider};
pub use device::{DeviceAdapter, DeviceSelector, SyntheticDevice};
pub use error::{PixelcastError, Result};
pub use events::{SessionEvent, StopReason};
pub use gpu::SystemBackend;
pub use health::{HealthMonitor, UnhealthyReason};
pub use pipeline::{PipelineStats, RenderPipeline};
pub use render::ShaderPreset;
pub use session::{SessionInfo, SessionState, StreamSession};
pub use types::{Handle, RenderMode, Resolution};
pub use viewport::{ContainerMetrics, Dimensions, ViewportScaler};
