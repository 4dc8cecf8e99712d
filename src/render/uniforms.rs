use bytemuck::{Pod, Zeroable};
use std::time::Duration;

/// Per-frame scalar/vector uniforms, laid out to match the shader's
/// `FrameUniforms` struct (16 bytes, std140-compatible).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub _padding: f32,
}

impl FrameUniforms {
    pub fn new(resolution: [f32; 2], time: f32) -> Self {
        Self {
            resolution,
            time,
            _padding: 0.0,
        }
    }
}

/// Converts raw tick timestamps into elapsed seconds, with the origin
/// captured at the first tick so shader periodics start near zero.
#[derive(Debug, Default)]
pub struct FrameClock {
    origin: Option<Duration>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self { origin: None }
    }

    /// Seconds since the first tick. The first call returns 0.0 and pins
    /// the origin; later calls are non-decreasing for non-decreasing input.
    pub fn elapsed(&mut self, timestamp: Duration) -> f32 {
        let origin = *self.origin.get_or_insert(timestamp);
        timestamp.saturating_sub(origin).as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_are_16_bytes() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 16);
    }

    #[test]
    fn first_tick_is_zero() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.elapsed(Duration::from_millis(1234)), 0.0);
    }

    #[test]
    fn consecutive_ticks_measure_from_origin() {
        let mut clock = FrameClock::new();
        let t0 = clock.elapsed(Duration::from_millis(0));
        let t1 = clock.elapsed(Duration::from_millis(16));
        assert_eq!(t0, 0.0);
        assert!((t1 - 0.016).abs() < 0.001);
    }

    #[test]
    fn elapsed_is_monotonic() {
        let mut clock = FrameClock::new();
        let mut prev = clock.elapsed(Duration::from_millis(100));
        for ms in [116, 133, 133, 150, 500] {
            let t = clock.elapsed(Duration::from_millis(ms));
            assert!(t >= prev);
            prev = t;
        }
    }
}
