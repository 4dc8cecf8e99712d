use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// A fully decoded audio track, downmixed to mono.
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioTrack {
    /// Decode an audio file into mono f32 samples.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Failed to probe audio format")?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .context("No audio tracks found")?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count());
        let sample_rate = track
            .codec_params
            .sample_rate
            .context("Unknown sample rate")?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create audio decoder")?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            downmix_into(&mut samples, sample_buf.samples(), channels);
        }

        log::info!(
            "Decoded audio: {} samples, {}Hz, {:.1}s",
            samples.len(),
            sample_rate,
            samples.len() as f32 / sample_rate as f32
        );

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Average interleaved frames down to mono; mono input passes through.
fn downmix_into(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
    } else {
        for frame in interleaved.chunks(channels) {
            out.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_downmix_averages_channel_pairs() {
        let mut out = Vec::new();
        downmix_into(&mut out, &[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn mono_passes_through_unchanged() {
        let mut out = vec![0.25];
        downmix_into(&mut out, &[0.5, -0.5], 1);
        assert_eq!(out, vec![0.25, 0.5, -0.5]);
    }
}
