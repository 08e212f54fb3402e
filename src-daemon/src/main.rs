//! lumend - headless audio-reactive LED daemon

mod cli;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Args;
use lumen_core::{AudioDevice, EffectRegistry, EngineConfig, Event, LedEngine};

const DEFAULT_LOG_FILTER: &str = "lumen_core=info,lumen_daemon=info";

/// How often the status line is logged
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    if args.list_devices {
        return list_devices();
    }
    if args.list_effects {
        return list_effects();
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    args.apply(&mut config);
    config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;

    info!("Starting Lumen LED daemon");
    let strip = lumen_strip::open_strip(&config.strip).context("Failed to open LED strip")?;
    let engine = LedEngine::new(config, strip).context("Failed to create engine")?;
    engine.start().context("Failed to start engine")?;

    run(&engine, args.run_for);

    engine.stop();
    info!("Lumen stopped");
    Ok(())
}

/// Drain events and log status until the deadline (forever if none)
fn run(engine: &LedEngine, run_for: Option<Duration>) {
    let started = Instant::now();
    let mut last_status = Instant::now();

    loop {
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }

        if let Some(event) = engine.wait_event(Duration::from_millis(250)) {
            log_event(&event);
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let audio = engine.audio_snapshot();
            let state = engine.snapshot().state;
            info!(
                effect = %state.effect,
                on = state.on,
                audio = audio.enabled,
                vol = audio.vol,
                bpm = audio.bpm,
                agc = audio.agc_gain,
                "Status"
            );
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::AudioDisabled { reason } => warn!("Audio disabled: {}", reason),
        Event::SinkError { message } => warn!("Strip error: {}", message),
        Event::EffectFault { key, message } => warn!("Effect {} failed: {}", key, message),
        other => info!(?other, "Engine event"),
    }
}

fn list_devices() -> Result<()> {
    let devices = AudioDevice::enumerate_inputs().context("Failed to enumerate capture devices")?;
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!(
            "{} {} (channels: {}, rates: {:?})",
            marker, device.name, device.max_channels, device.sample_rates
        );
    }
    Ok(())
}

fn list_effects() -> Result<()> {
    for effect in EffectRegistry::builtin().list() {
        let defaults = serde_json::to_string(&effect.default_params)?;
        println!("{:<18} {:<8} {:<18} {}", effect.id, effect.category, effect.label, defaults);
    }
    Ok(())
}
