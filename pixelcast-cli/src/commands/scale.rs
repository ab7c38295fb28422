//! Scale command - compute integer-scaled viewport dimensions

use anyhow::Result;
use clap::Args;
use pixelcast_core::types::Resolution;
use pixelcast_core::viewport::{ContainerMetrics, Insets, LayoutChrome, ViewportScaler};

/// Arguments for the scale command
#[derive(Args)]
pub struct ScaleArgs {
    /// Container width in CSS pixels
    #[arg(long)]
    width: f64,

    /// Container height in CSS pixels
    #[arg(long)]
    height: f64,

    /// Native content resolution (e.g. 160x144, 240x160)
    #[arg(short, long, default_value = "160x144")]
    native: Resolution,

    /// Device pixels per CSS pixel
    #[arg(short, long, default_value = "1.0")]
    density: f64,

    /// Padding on every edge
    #[arg(long, default_value = "0")]
    padding: f64,

    /// Border on every edge
    #[arg(long, default_value = "0")]
    border: f64,

    /// Width of sibling elements beside the surface
    #[arg(long, default_value = "0")]
    sibling_width: f64,

    /// Height of sibling elements above or below the surface
    #[arg(long, default_value = "0")]
    sibling_height: f64,
}

/// Print the surface size for a container
pub fn scale(args: ScaleArgs) -> Result<()> {
    let mut scaler = ViewportScaler::new(args.native);
    scaler.set_chrome(LayoutChrome {
        padding: Insets::uniform(args.padding),
        border: Insets::uniform(args.border),
        sibling_width: args.sibling_width,
        sibling_height: args.sibling_height,
    });

    let container = ContainerMetrics::new(args.width, args.height).with_pixel_density(args.density);
    let dims = scaler.force_recalculate(&container);

    println!("Native:   {}", args.native);
    println!("Scale:    {}x", dims.scale);
    println!("Logical:  {}", dims.logical);
    println!("Backing:  {}", dims.backing);

    let unused = Resolution::new(
        (args.width - dims.logical.width as f64).max(0.0) as u32,
        (args.height - dims.logical.height as f64).max(0.0) as u32,
    );
    println!("Unused:   {} (including chrome)", unused);

    Ok(())
}
