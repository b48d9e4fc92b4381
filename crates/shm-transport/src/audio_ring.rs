//! Circular audio sample region
//!
//! Audio travels as interleaved f32 frames through one large ring (~4 s of
//! sound). Positions are absolute i64 frame counts that only get reduced
//! modulo the capacity at copy time; a copy that crosses the end of the
//! region is split in two.

use crate::{TransportError, TransportResult};

/// Geometry of an audio ring inside a shared region
#[derive(Debug, Clone, Copy)]
pub struct AudioRingLayout {
    channels: usize,
    capacity_frames: usize,
}

impl AudioRingLayout {
    /// Ring sized to hold `seconds` of audio at the given rate.
    pub fn with_duration(channels: usize, rate: usize, seconds: usize) -> Self {
        Self {
            channels,
            capacity_frames: rate * seconds,
        }
    }

    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        Self {
            channels,
            capacity_frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Capacity in audio frames (one frame = one sample per channel)
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Bytes of one audio frame
    pub fn bytes_per_frame(&self) -> usize {
        self.channels * std::mem::size_of::<f32>()
    }

    /// Region size in bytes
    pub fn byte_len(&self) -> usize {
        self.capacity_frames * self.bytes_per_frame()
    }

    /// Copy `samples` (whole frames, interleaved) into the region starting
    /// at absolute frame position `start_frame`, wrapping as needed.
    pub fn write(
        &self,
        region: &mut [u8],
        start_frame: i64,
        samples: &[f32],
    ) -> TransportResult<()> {
        let frames = samples.len() / self.channels;
        if frames > self.capacity_frames {
            return Err(TransportError::RegionSize {
                expected: frames * self.bytes_per_frame(),
                actual: self.byte_len(),
            });
        }

        let bpf = self.bytes_per_frame();
        let start = (start_frame.rem_euclid(self.capacity_frames as i64)) as usize;
        let bytes = sample_bytes(samples);

        let first_frames = frames.min(self.capacity_frames - start);
        let first_bytes = first_frames * bpf;
        region[start * bpf..start * bpf + first_bytes].copy_from_slice(&bytes[..first_bytes]);

        // Remainder wraps to the front
        if first_frames < frames {
            let rest = &bytes[first_bytes..frames * bpf];
            region[..rest.len()].copy_from_slice(rest);
            tracing::trace!(start_frame, frames, "audio write wrapped the ring");
        }

        Ok(())
    }

    /// Copy `frames` audio frames out of the region starting at absolute
    /// frame position `start_frame`, appending to `out`.
    pub fn read(
        &self,
        region: &[u8],
        start_frame: i64,
        frames: usize,
        out: &mut Vec<f32>,
    ) -> TransportResult<()> {
        if frames > self.capacity_frames {
            return Err(TransportError::RegionSize {
                expected: frames * self.bytes_per_frame(),
                actual: self.byte_len(),
            });
        }

        let bpf = self.bytes_per_frame();
        let start = (start_frame.rem_euclid(self.capacity_frames as i64)) as usize;

        let first_frames = frames.min(self.capacity_frames - start);
        push_samples(&region[start * bpf..(start + first_frames) * bpf], out);

        if first_frames < frames {
            let rest = frames - first_frames;
            push_samples(&region[..rest * bpf], out);
        }

        Ok(())
    }
}

fn sample_bytes(samples: &[f32]) -> &[u8] {
    // f32 is plain old data; reinterpreting as bytes is sound
    unsafe {
        std::slice::from_raw_parts(
            samples.as_ptr() as *const u8,
            samples.len() * std::mem::size_of::<f32>(),
        )
    }
}

fn push_samples(bytes: &[u8], out: &mut Vec<f32>) {
    out.extend(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_ring(frames: usize) -> (AudioRingLayout, Vec<u8>) {
        let layout = AudioRingLayout::new(2, frames);
        let region = vec![0u8; layout.byte_len()];
        (layout, region)
    }

    #[test]
    fn test_write_read_without_wrap() {
        let (layout, mut region) = stereo_ring(16);
        let samples: Vec<f32> = (0..8).map(|i| i as f32).collect(); // 4 frames

        layout.write(&mut region, 0, &samples).unwrap();

        let mut out = Vec::new();
        layout.read(&region, 0, 4, &mut out).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_copy_splits_across_the_end() {
        let (layout, mut region) = stereo_ring(8);
        // 4 frames starting at frame 6 of an 8-frame ring: 2 at the end, 2
        // wrapped to the front
        let samples: Vec<f32> = (0..8).map(|i| 100.0 + i as f32).collect();

        layout.write(&mut region, 6, &samples).unwrap();

        let mut out = Vec::new();
        layout.read(&region, 6, 4, &mut out).unwrap();
        assert_eq!(out, samples);

        // The wrapped tail landed at the front of the region
        let mut front = Vec::new();
        layout.read(&region, 8, 2, &mut front).unwrap();
        assert_eq!(front, &samples[4..]);
    }

    #[test]
    fn test_absolute_offsets_keep_working_after_many_laps() {
        let (layout, mut region) = stereo_ring(4);

        // Position far beyond one lap still lands on the right slot
        let lap_offset = 4 * 1000 + 1;
        let samples = [1.5f32, -1.5, 2.5, -2.5]; // 2 frames
        layout.write(&mut region, lap_offset, &samples).unwrap();

        let mut out = Vec::new();
        layout.read(&region, lap_offset, 2, &mut out).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_oversized_write_rejected() {
        let (layout, mut region) = stereo_ring(4);
        let too_many: Vec<f32> = vec![0.0; 2 * 5]; // 5 frames into a 4-frame ring
        assert!(layout.write(&mut region, 0, &too_many).is_err());
    }
}
