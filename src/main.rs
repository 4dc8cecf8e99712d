mod app;
mod audio;
mod cli;
mod config;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use winit::event_loop::EventLoop;

use app::App;
use audio::decode::AudioTrack;
use audio::sampler::AudioSampler;
use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect lumina.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("lumina.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("lumina").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("lumina").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.width == 1280 { cli.width = cfg.window.width; }
            if cli.height == 640 { cli.height = cfg.window.height; }
            if cli.fft_size == 256 { cli.fft_size = cfg.audio.fft_size; }
            if cli.smoothing == 0.8 { cli.smoothing = cfg.audio.smoothing; }
            if cli.title.is_none() { cli.title = cfg.window.title; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("lumina - audio-reactive shader visualizer");
    log::info!("Input: {}", input.display());
    log::info!("Window: {}x{}", cli.width, cli.height);
    log::info!(
        "Analysis: {}-sample window, {} bins, smoothing {:.2}",
        cli.fft_size,
        cli.fft_size / 2,
        cli.smoothing
    );

    // 1. Decode audio
    log::info!("Decoding audio...");
    let track = AudioTrack::load(input)?;

    // 2. Audio capability check + analyser allocation. Failure here is
    //    fatal: no partial pipeline ever runs.
    let sampler = AudioSampler::new(cli.fft_size, cli.smoothing)
        .context("Audio initialization failed")?;

    // 3. Window + render loop; GPU setup happens on session start
    let title = cli.title.clone().unwrap_or_else(|| "lumina".to_string());
    let mut app = App::new(sampler, track, cli.width, cli.height, title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop
        .run_app(&mut app)
        .context("Event loop terminated abnormally")?;

    Ok(())
}
