//! Demo command - run a session against the synthetic capture device

use anyhow::{Context, Result};
use clap::Args;
use pixelcast_core::config::{FileSettings, MemorySettings, PerformanceStrategy, Settings};
use pixelcast_core::device::{SyntheticBehavior, SyntheticConfig, SyntheticDevice};
use pixelcast_core::types::Resolution;
use pixelcast_core::viewport::ContainerMetrics;
use pixelcast_core::{SessionEvent, SettingsProvider, ShaderPreset, StreamSession, SystemBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Arguments for the demo command
#[derive(Args)]
pub struct DemoArgs {
    /// How long to stream, in seconds
    #[arg(short, long, default_value = "5")]
    seconds: u64,

    /// Visual preset (none, scanlines, lcd-grid, dmg, performance)
    #[arg(short, long)]
    preset: Option<ShaderPreset>,

    /// Start with performance mode on
    #[arg(long)]
    performance: bool,

    /// Performance mode keeps the accelerated renderer and swaps presets
    #[arg(long)]
    low_cost: bool,

    /// Toggle performance mode after this many seconds
    #[arg(long)]
    toggle_after: Option<u64>,

    /// Unplug the synthetic device after this many seconds
    #[arg(long)]
    unplug_after: Option<u64>,

    /// Simulate a device that opens but never sends video
    #[arg(long)]
    no_frames: bool,

    /// Native resolution of the synthetic pattern
    #[arg(short, long, default_value = "160x144")]
    native: Resolution,

    /// Synthetic frame rate
    #[arg(long, default_value = "59.73")]
    fps: f64,

    /// Window size the surface is scaled into (WIDTHxHEIGHT)
    #[arg(short, long, default_value = "800x600")]
    window: Resolution,

    /// Save settings changes to the config file
    #[arg(long)]
    persist: bool,
}

/// Run a synthetic session and report what happened
pub async fn demo(args: DemoArgs) -> Result<()> {
    println!("Pixelcast - Synthetic Session\n");

    let settings: Arc<dyn SettingsProvider> = if args.persist {
        Arc::new(FileSettings::open_default().context("Failed to open config file")?)
    } else {
        Arc::new(MemorySettings::new(Settings::load()))
    };
    settings.update(&mut |s| {
        s.viewport.native_width = args.native.width;
        s.viewport.native_height = args.native.height;
        if args.performance {
            s.render.performance_mode = true;
        }
        if args.low_cost {
            s.render.performance_strategy = PerformanceStrategy::LowCostPreset;
        }
        if let Some(preset) = args.preset {
            s.render.preset = preset;
        }
    })?;

    let device = Arc::new(SyntheticDevice::new(SyntheticConfig {
        resolution: args.native,
        frame_rate: args.fps,
        behavior: if args.no_frames {
            SyntheticBehavior::NoFrames
        } else {
            SyntheticBehavior::Normal
        },
        ..Default::default()
    }));

    let session = StreamSession::new(device.clone(), Arc::new(SystemBackend::new()), settings.clone());
    let events = tokio::spawn(print_events(session.subscribe()));

    let snapshot = settings.snapshot();
    println!("Configuration:");
    println!("  Native:       {}", snapshot.native_resolution());
    println!("  Preset:       {}", snapshot.render.preset.display_name());
    println!(
        "  Performance:  {} ({})",
        if snapshot.render.performance_mode { "on" } else { "off" },
        snapshot.render.performance_strategy
    );
    println!("  Health wait:  {} ms", snapshot.health.timeout_ms);
    println!();

    let info = match session.start(None).await {
        Ok(info) => info,
        Err(e) => {
            println!("Start failed: {}", e.user_message());
            if let Some(hint) = e.user_hint() {
                println!("Hint: {}", hint);
            }
            events.abort();
            return Err(e).context("Failed to start session");
        }
    };

    println!("Streaming from {}", info.device);
    println!("  Session:   {}", info.session);
    println!("  Renderer:  {}", info.render_mode);
    println!("  Content:   {} @ {:.2} fps", info.capabilities.resolution, info.capabilities.frame_rate);

    let container = ContainerMetrics::new(args.window.width as f64, args.window.height as f64);
    if let Some(dims) = session.force_resize(container).await {
        println!("  Surface:   {}", dims);
    }
    println!();
    println!("Press Ctrl+C to stop...\n");

    let scripted = run_script(&session, device.clone(), &args);
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            println!("\nReceived interrupt signal...");
        }
        _ = scripted => {
            info!("Demo finished");
        }
    }

    let stats = session.stats().await;
    if let Some(frame) = session.screenshot() {
        println!(
            "Last picture: {} from surface {} ({} renderer)",
            frame.resolution, frame.surface, frame.mode
        );
    }

    println!("Stopping session...");
    session.stop().await.context("Failed to stop session")?;
    // Let the printer drain the stop event
    tokio::time::sleep(Duration::from_millis(50)).await;
    events.abort();

    println!();
    println!("{}", stats);
    println!(
        "Device: {} acquisitions, {} releases",
        device.acquisitions(),
        device.releases()
    );

    Ok(())
}

/// Drive the timed toggles, then wait out the remaining time
async fn run_script(session: &StreamSession, device: Arc<SyntheticDevice>, args: &DemoArgs) {
    let mut actions: Vec<(u64, Action)> = Vec::new();
    if let Some(at) = args.toggle_after {
        actions.push((at, Action::TogglePerformance));
    }
    if let Some(at) = args.unplug_after {
        actions.push((at, Action::Unplug));
    }
    actions.sort_by_key(|(at, _)| *at);

    let start = tokio::time::Instant::now();
    for (at, action) in actions {
        if at >= args.seconds {
            continue;
        }
        tokio::time::sleep_until(start + Duration::from_secs(at)).await;
        match action {
            Action::TogglePerformance => {
                let enabled = !session.stats().await.performance_mode;
                match session.set_performance_mode(enabled).await {
                    Ok(mode) => println!(
                        "Performance mode {} -> {} renderer",
                        if enabled { "on" } else { "off" },
                        mode
                    ),
                    Err(e) => println!("Performance toggle failed: {}", e),
                }
            }
            Action::Unplug => {
                println!("Unplugging synthetic device");
                device.disconnect();
            }
        }
    }

    tokio::time::sleep_until(start + Duration::from_secs(args.seconds)).await;
}

#[derive(Debug, Clone, Copy)]
enum Action {
    TogglePerformance,
    Unplug,
}

async fn print_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event {
                SessionEvent::SessionStarted(info) => {
                    println!("[event] started {} ({})", info.session, info.render_mode)
                }
                SessionEvent::SessionStopped { session, reason } => {
                    println!("[event] stopped {} ({})", session, reason)
                }
                SessionEvent::SessionError { error, .. } => {
                    println!("[event] error: {}", error)
                }
                SessionEvent::SurfaceExpired { surface, reason } => {
                    println!("[event] surface {} expired: {}", surface, reason)
                }
                SessionEvent::RenderModeChanged { mode, preset } => {
                    println!("[event] rendering {} with preset '{}'", mode, preset)
                }
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event printer skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
