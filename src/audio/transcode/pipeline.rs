//! Contextos de decodificación de una pasada sobre la entrada.
//!
//! [`Pipeline`] es dueño del lector de contenedor, el decodificador y el
//! remuestreador. Los campos se liberan en orden de declaración: decoder,
//! resampler y por último el formato, que suelta el adaptador de entrada.

use std::io::ErrorKind;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecType, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

use super::io::{SharedInput, StreamAdapter};
use super::resample::StereoResampler;
use crate::error::TranscodeError;

/// Nombre corto de un códec para mensajes al usuario.
pub fn codec_type_to_name(codec: CodecType) -> String {
    use symphonia::core::codecs::*;
    let name = match codec {
        CODEC_TYPE_AAC => "aac",
        CODEC_TYPE_FLAC => "flac",
        CODEC_TYPE_MP1 => "mp1",
        CODEC_TYPE_MP2 => "mp2",
        CODEC_TYPE_MP3 => "mp3",
        CODEC_TYPE_OPUS => "opus",
        CODEC_TYPE_VORBIS => "vorbis",
        CODEC_TYPE_ALAC => "alac",
        CODEC_TYPE_WAVPACK => "wavpack",
        CODEC_TYPE_PCM_U8 => "pcm_u8",
        CODEC_TYPE_PCM_S16LE => "pcm_s16le",
        CODEC_TYPE_PCM_S16BE => "pcm_s16be",
        CODEC_TYPE_PCM_S24LE => "pcm_s24le",
        CODEC_TYPE_PCM_S24BE => "pcm_s24be",
        CODEC_TYPE_PCM_S32LE => "pcm_s32le",
        CODEC_TYPE_PCM_S32BE => "pcm_s32be",
        CODEC_TYPE_PCM_F32LE => "pcm_f32le",
        CODEC_TYPE_PCM_F32BE => "pcm_f32be",
        CODEC_TYPE_PCM_F64LE => "pcm_f64le",
        CODEC_TYPE_PCM_F64BE => "pcm_f64be",
        CODEC_TYPE_PCM_ALAW => "pcm_alaw",
        CODEC_TYPE_PCM_MULAW => "pcm_mulaw",
        CODEC_TYPE_ADPCM_IMA_WAV => "adpcm_ima_wav",
        CODEC_TYPE_ADPCM_MS => "adpcm_ms",
        other => return format!("codec {}", other),
    };
    name.to_string()
}

fn time_to_duration(time: Time) -> Duration {
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac.clamp(0.0, 1.0))
}

/// Resultado de leer un paquete.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// Hay frames listos en [`Pipeline::output`]. La posición sale del timestamp.
    Frames { position: Option<Duration> },
    /// Paquete de otra pista o con datos corruptos recuperables.
    Skipped,
    EndOfStream,
}

pub struct Pipeline {
    decoder: Box<dyn Decoder>,
    resampler: Option<StereoResampler>,
    format: Box<dyn FormatReader>,
    track_id: u32,
    time_base: Option<TimeBase>,
    duration: Option<Duration>,
    codec_name: String,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl Pipeline {
    /// Prueba el contenedor, elige la primera pista de audio y abre su decodificador.
    pub fn open(input: SharedInput) -> Result<Self, TranscodeError> {
        let source = ReadOnlySource::new(StreamAdapter::new(input));
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| TranscodeError::Probe(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(TranscodeError::NoAudioTrack)?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let codec_name = codec_type_to_name(params.codec);

        let registry = symphonia::default::get_codecs();
        if registry.get_codec(params.codec).is_none() {
            return Err(TranscodeError::UnsupportedCodec { codec: codec_name });
        }
        let decoder = registry
            .make(&params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => TranscodeError::UnsupportedCodec {
                    codec: codec_name.clone(),
                },
                other => TranscodeError::Decode(other.to_string()),
            })?;

        let time_base = params
            .time_base
            .or_else(|| params.sample_rate.map(|rate| TimeBase::new(1, rate)));
        let duration = match (params.n_frames, time_base) {
            (Some(frames), Some(tb)) => Some(time_to_duration(tb.calc_time(frames))),
            _ => None,
        };

        debug!(
            "🎼 Pista {} abierta: {} {:?} Hz, duración {:?}",
            track_id, codec_name, params.sample_rate, duration
        );

        Ok(Self {
            decoder,
            resampler: None,
            format,
            track_id,
            time_base,
            duration,
            codec_name,
            sample_buf: None,
        })
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn decode_next(&mut self) -> Result<Decoded, TranscodeError> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(Decoded::EndOfStream);
            }
            Err(SymphoniaError::ResetRequired) => return Ok(Decoded::EndOfStream),
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != self.track_id {
            return Ok(Decoded::Skipped);
        }

        let position = self
            .time_base
            .map(|tb| time_to_duration(tb.calc_time(packet.ts())));

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!("⚠️ Paquete corrupto descartado: {}", msg);
                return Ok(Decoded::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.capacity();

        let too_small = self
            .sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < frames * channels);
        if too_small {
            self.sample_buf = Some(SampleBuffer::new(frames as u64, spec));
        }
        let Some(buf) = self.sample_buf.as_mut() else {
            return Ok(Decoded::Skipped);
        };
        buf.copy_interleaved_ref(decoded);

        if self.resampler.is_none() {
            self.resampler = Some(StereoResampler::new(spec.rate, channels)?);
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.push_interleaved(buf.samples())?;
        }

        Ok(Decoded::Frames { position })
    }

    /// Vacía el remuestreador al final de la pasada.
    pub fn finish(&mut self) -> Result<(), TranscodeError> {
        match self.resampler.as_mut() {
            Some(resampler) => resampler.flush(),
            None => Ok(()),
        }
    }

    pub fn output(&self) -> (&[f32], &[f32]) {
        match &self.resampler {
            Some(resampler) => resampler.output(),
            None => (&[], &[]),
        }
    }

    pub fn clear_output(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.clear_output();
        }
    }
}
