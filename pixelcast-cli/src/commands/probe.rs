//! Probe command - show graphics capabilities

use anyhow::{Context, Result};
use clap::Args;
use pixelcast_core::capability::CapabilityProbe;
use pixelcast_core::gpu::{FORCE_SOFTWARE_ENV, detect_gpu};
use pixelcast_core::SystemBackend;
use std::sync::Arc;

/// Arguments for the probe command
#[derive(Args)]
pub struct ProbeArgs {
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

/// Probe the render tiers this machine offers
pub async fn probe(args: ProbeArgs) -> Result<()> {
    let probe = CapabilityProbe::new(Arc::new(SystemBackend::new()));
    let report = probe.detect().await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    println!("Pixelcast - Graphics Capabilities\n");

    println!("GPU:");
    match detect_gpu() {
        Ok(gpu) => {
            println!("  Model:   {}", gpu.name);
            println!("  Vendor:  {:?}", gpu.vendor);
        }
        Err(e) => println!("  Not detected ({})", e),
    }
    println!();

    println!("{}", report);
    println!();

    if report.supports_worker_rendering() {
        println!("Sessions will use the accelerated renderer.");
        println!("Set {}=1 to force software rendering.", FORCE_SOFTWARE_ENV);
    } else if report.supports_acceleration() {
        println!(
            "The {} tier cannot render off the main thread; sessions will use the software renderer.",
            report.preferred_tier
        );
    } else {
        println!("Sessions will use the software renderer.");
        println!("Shader presets are only applied by the accelerated renderer.");
    }

    Ok(())
}
