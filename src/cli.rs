use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lumina", about = "Audio-reactive shader visualizer")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: Option<PathBuf>,

    /// Window width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 640)]
    pub height: u32,

    /// FFT analysis window size (power of two; spectrum has half this many bins)
    #[arg(long, default_value_t = 256)]
    pub fft_size: usize,

    /// Spectrum smoothing factor (0.0-1.0, higher = smoother)
    #[arg(long, default_value_t = 0.8)]
    pub smoothing: f32,

    /// Window title
    #[arg(long)]
    pub title: Option<String>,

    /// Config file path (default: lumina.toml, then ~/.config/lumina/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
