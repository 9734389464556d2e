//! Conversión de canales a estéreo y de frecuencia a 48 kHz.
//!
//! La matriz de canales siempre se aplica, también para entradas que ya son
//! estéreo; el remuestreo con rubato solo se crea si la frecuencia difiere.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use super::pcm::{TARGET_CHANNELS, TARGET_SAMPLE_RATE};
use crate::error::TranscodeError;

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;
const CENTER_GAIN: f32 = 0.707;

/// Pesos (izquierda, derecha) de cada canal de entrada, normalizados.
///
/// Orden estándar: FL, FR, FC, LFE y luego pares L/R. El LFE se descarta.
pub fn channel_weights(channels: usize) -> Vec<[f32; 2]> {
    match channels {
        0 => Vec::new(),
        1 => vec![[1.0, 1.0]],
        2 => vec![[1.0, 0.0], [0.0, 1.0]],
        n => {
            let mut weights = Vec::with_capacity(n);
            for ch in 0..n {
                let w = match ch {
                    0 => [1.0, 0.0],
                    1 => [0.0, 1.0],
                    2 => [CENTER_GAIN, CENTER_GAIN],
                    3 => [0.0, 0.0],
                    c if c % 2 == 0 => [1.0, 0.0],
                    _ => [0.0, 1.0],
                };
                weights.push(w);
            }

            let left: f32 = weights.iter().map(|w| w[0]).sum();
            let right: f32 = weights.iter().map(|w| w[1]).sum();
            for w in &mut weights {
                w[0] /= left;
                w[1] /= right;
            }
            weights
        }
    }
}

pub struct StereoResampler {
    weights: Vec<[f32; 2]>,
    resampler: Option<FftFixedIn<f32>>,
    pending: [Vec<f32>; TARGET_CHANNELS],
    input_buf: Vec<Vec<f32>>,
    output_buf: Vec<Vec<f32>>,
    out: [Vec<f32>; TARGET_CHANNELS],
}

impl StereoResampler {
    pub fn new(in_rate: u32, in_channels: usize) -> Result<Self, TranscodeError> {
        if in_channels == 0 {
            return Err(TranscodeError::Resample("cero canales de entrada".to_string()));
        }

        let resampler = if in_rate != TARGET_SAMPLE_RATE {
            debug!("🔁 Remuestreando {} Hz -> {} Hz", in_rate, TARGET_SAMPLE_RATE);
            Some(
                FftFixedIn::<f32>::new(
                    in_rate as usize,
                    TARGET_SAMPLE_RATE as usize,
                    CHUNK_SIZE,
                    SUB_CHUNKS,
                    TARGET_CHANNELS,
                )
                .map_err(|e| TranscodeError::Resample(e.to_string()))?,
            )
        } else {
            None
        };

        let output_buf = match &resampler {
            Some(r) => r.output_buffer_allocate(true),
            None => Vec::new(),
        };

        Ok(Self {
            weights: channel_weights(in_channels),
            resampler,
            pending: Default::default(),
            input_buf: vec![Vec::new(); TARGET_CHANNELS],
            output_buf,
            out: Default::default(),
        })
    }

    pub fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Recibe muestras intercaladas con el número de canales de entrada.
    pub fn push_interleaved(&mut self, samples: &[f32]) -> Result<(), TranscodeError> {
        let channels = self.weights.len();
        for frame in samples.chunks_exact(channels) {
            let mut l = 0.0;
            let mut r = 0.0;
            for (sample, w) in frame.iter().zip(&self.weights) {
                l += sample * w[0];
                r += sample * w[1];
            }
            self.pending[0].push(l);
            self.pending[1].push(r);
        }
        self.drain_full_chunks()
    }

    fn drain_full_chunks(&mut self) -> Result<(), TranscodeError> {
        let Some(resampler) = self.resampler.as_mut() else {
            for (out, pending) in self.out.iter_mut().zip(self.pending.iter_mut()) {
                out.append(pending);
            }
            return Ok(());
        };

        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                return Ok(());
            }

            for (input, pending) in self.input_buf.iter_mut().zip(&self.pending) {
                input.clear();
                input.extend_from_slice(&pending[..needed]);
            }

            let (used, produced) = resampler
                .process_into_buffer(&self.input_buf, &mut self.output_buf, None)
                .map_err(|e| TranscodeError::Resample(e.to_string()))?;

            for c in 0..TARGET_CHANNELS {
                self.out[c].extend_from_slice(&self.output_buf[c][..produced]);
                self.pending[c].drain(..used);
            }
        }
    }

    /// Procesa lo que quede pendiente al final de la entrada.
    pub fn flush(&mut self) -> Result<(), TranscodeError> {
        self.drain_full_chunks()?;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        if self.pending[0].is_empty() {
            return Ok(());
        }

        for (input, pending) in self.input_buf.iter_mut().zip(self.pending.iter_mut()) {
            input.clear();
            input.append(pending);
        }

        let (_, produced) = resampler
            .process_partial_into_buffer(Some(self.input_buf.as_slice()), &mut self.output_buf, None)
            .map_err(|e| TranscodeError::Resample(e.to_string()))?;

        for c in 0..TARGET_CHANNELS {
            self.out[c].extend_from_slice(&self.output_buf[c][..produced]);
        }
        Ok(())
    }

    /// Frames listos para codificar, canal izquierdo y derecho.
    pub fn output(&self) -> (&[f32], &[f32]) {
        (&self.out[0], &self.out[1])
    }

    pub fn output_frames(&self) -> usize {
        self.out[0].len()
    }

    pub fn clear_output(&mut self) {
        for out in &mut self.out {
            out.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated() {
        let mut r = StereoResampler::new(48_000, 1).unwrap();
        r.push_interleaved(&[0.25, -0.5]).unwrap();
        let (l, rr) = r.output();
        assert_eq!(l, &[0.25, -0.5]);
        assert_eq!(rr, &[0.25, -0.5]);
        assert!(!r.is_resampling());
    }

    #[test]
    fn test_stereo_passes_through_matrix() {
        let mut r = StereoResampler::new(48_000, 2).unwrap();
        r.push_interleaved(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        let (l, rr) = r.output();
        assert_eq!(l, &[0.1, 0.3]);
        assert_eq!(rr, &[0.2, 0.4]);
    }

    #[test]
    fn test_surround_weights_are_normalized() {
        let weights = channel_weights(6);
        let left: f32 = weights.iter().map(|w| w[0]).sum();
        let right: f32 = weights.iter().map(|w| w[1]).sum();
        assert!((left - 1.0).abs() < 1e-5);
        assert!((right - 1.0).abs() < 1e-5);
        assert_eq!(weights[3], [0.0, 0.0]);
    }

    #[test]
    fn test_resampling_output_rate() {
        let mut r = StereoResampler::new(44_100, 2).unwrap();
        assert!(r.is_resampling());
        let second = vec![0.0f32; 44_100 * 2];
        r.push_interleaved(&second).unwrap();
        r.flush().unwrap();
        let frames = r.output_frames();
        assert!(frames > 46_000 && frames < 50_000, "frames = {}", frames);
        assert_eq!(r.output().0.len(), r.output().1.len());
    }
}
