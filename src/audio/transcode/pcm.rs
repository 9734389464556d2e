//! Formato de salida fijo: PCM s16le, estéreo, 48 kHz.

use std::io::{self, Write};

pub const TARGET_SAMPLE_RATE: u32 = 48_000;
pub const TARGET_CHANNELS: usize = 2;
/// Bytes por frame estéreo de 16 bits.
pub const BYTES_PER_FRAME: usize = TARGET_CHANNELS * 2;

pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;

const GAIN_ONE: i64 = 1 << 16;

/// Destino del PCM producido. Cualquier `Write` sirve.
pub trait PcmSink: Send {
    fn write_pcm(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush_pcm(&mut self) -> io::Result<()>;
}

impl<W: Write + Send> PcmSink for W {
    fn write_pcm(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn flush_pcm(&mut self) -> io::Result<()> {
        self.flush()
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return MIN_VOLUME;
    }
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

/// Volumen lineal en punto fijo Q16.
pub fn gain_q16(volume: f32) -> i64 {
    (clamp_volume(volume) as f64 * GAIN_ONE as f64).round() as i64
}

/// Escala una muestra en dominio entero y satura al rango de 16 bits.
pub fn scale_sample(sample: i16, gain: i64) -> i16 {
    let scaled = (sample as i64 * gain) >> 16;
    scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Convierte canales planos L/R a bytes intercalados con volumen aplicado.
///
/// El buffer interno solo crece.
#[derive(Default)]
pub struct PcmEncoder {
    scratch: Vec<u8>,
}

impl PcmEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, left: &[f32], right: &[f32], gain: i64) -> &[u8] {
        let frames = left.len().min(right.len());
        let needed = frames * BYTES_PER_FRAME;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0);
        }

        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            let offset = i * BYTES_PER_FRAME;
            let l = scale_sample(f32_to_i16(*l), gain).to_le_bytes();
            let r = scale_sample(f32_to_i16(*r), gain).to_le_bytes();
            self.scratch[offset..offset + 2].copy_from_slice(&l);
            self.scratch[offset + 2..offset + 4].copy_from_slice(&r);
        }

        &self.scratch[..needed]
    }

    pub fn capacity(&self) -> usize {
        self.scratch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_volume_silences() {
        let gain = gain_q16(0.0);
        assert_eq!(scale_sample(i16::MAX, gain), 0);
        assert_eq!(scale_sample(i16::MIN, gain), 0);
        assert_eq!(scale_sample(1234, gain), 0);
    }

    #[test]
    fn test_unity_volume_is_identity() {
        let gain = gain_q16(1.0);
        for s in [i16::MIN, -1, 0, 1, 12_345, i16::MAX] {
            assert_eq!(scale_sample(s, gain), s);
        }
    }

    #[test]
    fn test_overflow_saturates() {
        let gain = gain_q16(2.0);
        assert_eq!(scale_sample(30_000, gain), i16::MAX);
        assert_eq!(scale_sample(-30_000, gain), i16::MIN);
        assert_eq!(scale_sample(1_000, gain), 2_000);
    }

    #[test]
    fn test_volume_range_is_clamped() {
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(5.0), 2.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(gain_q16(10.0), gain_q16(2.0));
    }

    #[test]
    fn test_encoder_interleaves_and_grows_only() {
        let mut encoder = PcmEncoder::new();
        let gain = gain_q16(1.0);

        let bytes = encoder.encode(&[1.0, 0.0], &[-1.0, 0.0], gain).to_vec();
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);

        let small = encoder.encode(&[0.5], &[0.5], gain).len();
        assert_eq!(small, 4);
        assert_eq!(encoder.capacity(), 8);
    }
}
