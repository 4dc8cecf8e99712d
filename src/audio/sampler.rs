//! Live audio playback with an on-demand frequency analyser.
//!
//! The cpal output callback is the only writer of the sample tap; the render
//! loop is the only reader, via [`AudioSampler::sample`], which snapshots the
//! most recent analysis window and runs the FFT synchronously.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::decode::AudioTrack;

/// Spectrum magnitudes are mapped from this dB range onto 0..255.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("FFT window size must be a power of two >= 32, got {0}")]
    InvalidFftSize(usize),
    #[error("smoothing must be in 0.0..1.0, got {0}")]
    InvalidSmoothing(f32),
}

/// Fixed-capacity ring holding the most recently played samples.
pub struct TapBuffer {
    samples: Vec<f32>,
    write_pos: usize,
}

impl TapBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            write_pos: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.samples[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
    }

    /// Copy the last `out.len()` samples into `out`, oldest first.
    pub fn snapshot(&self, out: &mut [f32]) {
        let n = self.samples.len();
        debug_assert!(out.len() <= n);
        let start = (self.write_pos + n - out.len()) % n;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.samples[(start + i) % n];
        }
    }
}

/// Windowed FFT with per-bin temporal smoothing and dB byte mapping,
/// matching the analyser behaviour the fragment shader was written against:
/// each of the `fft_size / 2` bins is a magnitude in 0.0..=255.0.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    spectrum: Vec<f32>,
    smoothing: f32,
    fft_size: usize,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self, AudioError> {
        if fft_size < 32 || !fft_size.is_power_of_two() {
            return Err(AudioError::InvalidFftSize(fft_size));
        }
        if !(0.0..1.0).contains(&smoothing) {
            return Err(AudioError::InvalidSmoothing(smoothing));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let bins = fft_size / 2;

        Ok(Self {
            fft,
            window: hann_window(fft_size),
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; bins],
            spectrum: vec![0.0; bins],
            smoothing,
            fft_size,
        })
    }

    /// Number of frequency bins produced per analysis (half the window size).
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    /// Analyse one window of time-domain samples, overwriting and returning
    /// the internal spectrum buffer. `frame` must hold `fft_size` samples.
    pub fn process(&mut self, frame: &[f32]) -> &[f32] {
        debug_assert_eq!(frame.len(), self.fft_size);

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            *slot = Complex::new(frame[i] * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let norm = 1.0 / self.fft_size as f32;
        for (i, out) in self.spectrum.iter_mut().enumerate() {
            let magnitude = self.scratch[i].norm() * norm;
            self.smoothed[i] =
                self.smoothing * self.smoothed[i] + (1.0 - self.smoothing) * magnitude;

            let db = 20.0 * self.smoothed[i].log10();
            let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            *out = scaled.clamp(0.0, 255.0);
        }

        &self.spectrum
    }
}

/// Owns the audio output routing and the spectrum the render loop reads.
pub struct AudioSampler {
    analyzer: SpectrumAnalyzer,
    tap: Arc<Mutex<TapBuffer>>,
    frame: Vec<f32>,
    device: cpal::Device,
    _stream: Option<cpal::Stream>,
}

impl AudioSampler {
    /// Resolve the output device and allocate analysis buffers. Fails if the
    /// platform has no audio capability; the caller must abort setup.
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self, AudioError> {
        let analyzer = SpectrumAnalyzer::new(fft_size, smoothing)?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        log::info!(
            "Audio output: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        Ok(Self {
            tap: Arc::new(Mutex::new(TapBuffer::new(fft_size))),
            frame: vec![0.0; fft_size],
            analyzer,
            device,
            _stream: None,
        })
    }

    pub fn bin_count(&self) -> usize {
        self.analyzer.bin_count()
    }

    /// Route the decoded track to the output device and start playback.
    /// Every played sample also lands in the analysis tap, so the spectrum
    /// is meaningful only after this call.
    pub fn connect(&mut self, track: AudioTrack) -> Result<()> {
        let config = self
            .device
            .default_output_config()
            .context("Failed to get audio output config")?;

        let out_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let step = track.sample_rate as f64 / out_rate as f64;

        log::info!(
            "Playing {:.1}s track at {}Hz ({}ch device @ {}Hz)",
            track.duration_secs(),
            track.sample_rate,
            channels,
            out_rate
        );

        let samples = track.samples;
        let tap = Arc::clone(&self.tap);
        let mut cursor = 0.0f64;

        let stream = self
            .device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut tap = match tap.lock() {
                        Ok(tap) => tap,
                        Err(_) => return,
                    };
                    for frame_out in data.chunks_mut(channels) {
                        let idx = cursor as usize;
                        // Linear interpolation between track and device rates;
                        // silence once the track runs out.
                        let sample = if idx + 1 < samples.len() {
                            let frac = (cursor - idx as f64) as f32;
                            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
                        } else {
                            0.0
                        };
                        for slot in frame_out.iter_mut() {
                            *slot = sample;
                        }
                        tap.push(sample);
                        cursor += step;
                    }
                },
                |err| log::warn!("Audio stream error: {}", err),
                None,
            )
            .context("Failed to build audio output stream")?;

        stream.play().context("Failed to start audio playback")?;
        self._stream = Some(stream);

        Ok(())
    }

    /// Overwrite the internal spectrum with an analysis of the most recently
    /// played window and return it. Never blocks on the audio driver; before
    /// `connect` (or during silence) the bins are all zero.
    pub fn sample(&mut self) -> &[f32] {
        {
            let tap = match self.tap.lock() {
                Ok(tap) => tap,
                Err(_) => return self.analyzer.spectrum(),
            };
            tap.snapshot(&mut self.frame);
        }
        self.analyzer.process(&self.frame)
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_window_sizes() {
        assert!(matches!(
            SpectrumAnalyzer::new(100, 0.8),
            Err(AudioError::InvalidFftSize(100))
        ));
        assert!(matches!(
            SpectrumAnalyzer::new(16, 0.8),
            Err(AudioError::InvalidFftSize(16))
        ));
        assert!(SpectrumAnalyzer::new(256, 0.8).is_ok());
    }

    #[test]
    fn rejects_bad_smoothing() {
        assert!(matches!(
            SpectrumAnalyzer::new(256, 1.0),
            Err(AudioError::InvalidSmoothing(_))
        ));
        assert!(SpectrumAnalyzer::new(256, 0.0).is_ok());
    }

    #[test]
    fn window_of_256_yields_128_bins_every_call() {
        let mut analyzer = SpectrumAnalyzer::new(256, 0.8).unwrap();
        let silence = vec![0.0; 256];
        for _ in 0..5 {
            let spectrum = analyzer.process(&silence);
            assert_eq!(spectrum.len(), 128);
        }
        assert_eq!(analyzer.bin_count(), 128);
    }

    #[test]
    fn silence_maps_to_zero() {
        let mut analyzer = SpectrumAnalyzer::new(256, 0.8).unwrap();
        let spectrum = analyzer.process(&vec![0.0; 256]);
        assert!(spectrum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn values_stay_in_byte_range() {
        let mut analyzer = SpectrumAnalyzer::new(256, 0.0).unwrap();
        // Full-scale square-ish signal, loudest reasonable input
        let frame: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        for _ in 0..3 {
            let spectrum = analyzer.process(&frame);
            assert!(spectrum.iter().all(|&v| (0.0..=255.0).contains(&v)));
        }
    }

    #[test]
    fn sine_peaks_at_its_own_bin() {
        let mut analyzer = SpectrumAnalyzer::new(256, 0.0).unwrap();
        let bin = 16;
        // Quiet enough that the peak bin stays below the 255 ceiling,
        // otherwise the Hann-leakage neighbours clamp to the same value.
        let frame: Vec<f32> = (0..256)
            .map(|i| 0.01 * (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / 256.0).sin())
            .collect();
        let spectrum = analyzer.process(&frame).to_vec();

        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
        assert!(spectrum[bin] > 150.0);
        // Away from the peak (and the Hann sidelobes) the floor is quiet
        assert!(spectrum[100] < 50.0);
    }

    #[test]
    fn smoothing_carries_energy_across_frames() {
        let mut analyzer = SpectrumAnalyzer::new(256, 0.8).unwrap();
        let bin = 8;
        let tone: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / 256.0).sin())
            .collect();
        analyzer.process(&tone);
        let after_tone = analyzer.process(&vec![0.0; 256]).to_vec();
        // The bin decays rather than dropping straight to zero
        assert!(after_tone[bin] > 0.0);
    }

    #[test]
    fn tap_snapshot_returns_most_recent_in_order() {
        let mut tap = TapBuffer::new(4);
        for s in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            tap.push(s);
        }
        let mut out = [0.0; 4];
        tap.snapshot(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);

        let mut last_two = [0.0; 2];
        tap.snapshot(&mut last_two);
        assert_eq!(last_two, [5.0, 6.0]);
    }
}
