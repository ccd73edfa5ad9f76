// src/main.rs

use anyhow::{anyhow, Context};
use log::{info, warn};

use surfaceless_egl::device::drm::{self, SysfsLoader};
use surfaceless_egl::driver::HeadlessDriver;
use surfaceless_egl::{
    BufferMask, Display, DisplayOptions, SoftwareFallback, SurfaceAttributes, CONFIG,
};

const PROBE_WIDTH: i32 = 64;
const PROBE_HEIGHT: i32 = 64;

/// Main entry point for `surfaceless-info`.
fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = &*CONFIG;
    info!("Configuration: {:?}", config);

    let devices = drm::enumerate_devices().context("Failed to enumerate DRM devices")?;
    info!("Found {} device(s)", devices.len());
    for device in devices.iter() {
        info!(
            "  {}: classes {:?}, nodes {:?}",
            device.id(),
            device.classes(),
            device.available_nodes()
        );
    }

    // The headless driver only loads software drivers, so hardware nodes
    // always need the software device behind them.
    let options = DisplayOptions {
        software_fallback: SoftwareFallback::Always,
        ..DisplayOptions::from_config(config)
    };
    let mut display = Display::new(
        SysfsLoader::from_config(config),
        HeadlessDriver::new(),
        devices,
        options,
    );
    display
        .initialize()
        .context("Failed to initialize the surfaceless display")?;

    println!("device:      {:?}", display.device());
    println!("driver:      {}", display.driver_name().unwrap_or("-"));
    println!("device name: {}", display.device_name().unwrap_or("-"));
    println!("binding:     {:?}", display.binding());
    println!("configs:");
    for config in display.configs() {
        println!(
            "  #{:<3} {:?} {:?}{}",
            config.id,
            config.format,
            config.surface_types,
            if config.driver_config.srgb_capable { " srgb" } else { "" }
        );
    }

    let config = *display
        .configs()
        .first()
        .ok_or_else(|| anyhow!("Display exposes no configs"))?;
    let mut surface = display
        .create_pbuffer_surface(&config, SurfaceAttributes::new(PROBE_WIDTH, PROBE_HEIGHT))
        .context("Failed to create a pbuffer surface")?;

    let mask = display.get_buffers(&mut surface, BufferMask::BACK)?.mask;
    if mask.is_empty() {
        warn!("Driver could not allocate a {}x{} image", PROBE_WIDTH, PROBE_HEIGHT);
    } else {
        println!(
            "pbuffer:     {}x{} {:?}, buffers {:?}",
            surface.width(),
            surface.height(),
            surface.format(),
            mask
        );
    }

    display.destroy_surface(surface);
    info!("Done.");
    Ok(())
}
