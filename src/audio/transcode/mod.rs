//! # Motor de transcodificación
//!
//! Convierte cualquier contenedor/códec soportado por symphonia en PCM
//! s16le estéreo a 48 kHz y lo escribe en un [`PcmSink`].
//!
//! ## Flujo de una pasada
//!
//! 1. [`Pipeline::open`] prueba el contenedor sobre un adaptador sin seek.
//! 2. Cada paquete se decodifica, se mezcla a estéreo y se remuestrea.
//! 3. El volumen se aplica en dominio entero y los bytes van al sink.
//! 4. Con [`Pacing::RealTime`] se duerme cuando el audio adelanta al reloj.
//!
//! Si el flag de repetición está activo al terminar, la misma entrada se
//! rebobina y se repite dentro de la misma llamada a [`TranscodeEngine::run`].
//!
//! `run` es bloqueante: el controlador lo ejecuta con `spawn_blocking`.

pub mod io;
pub mod pcm;
pub mod pipeline;
pub mod resample;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::controls::PlaybackControls;
use crate::error::TranscodeError;

pub use io::{HttpInput, MediaInput, ProcessInput, SharedInput, StreamAdapter};
pub use pcm::{PcmEncoder, PcmSink, BYTES_PER_FRAME, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
pub use pipeline::{Decoded, Pipeline};

/// Margen de adelanto tolerado antes de dormir.
const PACING_SLACK: Duration = Duration::from_millis(1);
/// Sueño máximo entre comprobaciones de cancelación.
pub const SLEEP_QUANTUM: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// No adelantarse al reloj de pared.
    RealTime,
    /// Producir tan rápido como se pueda decodificar.
    Unthrottled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// La entrada se agotó (tras las repeticiones que hubiera).
    Finished,
    /// Se disparó la señal de cancelación.
    Cancelled,
}

/// Reloj de ritmo: tiempo de audio emitido frente a tiempo real.
struct PaceClock {
    started: Instant,
    frames_emitted: u64,
}

impl PaceClock {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            frames_emitted: 0,
        }
    }

    fn advance(&mut self, frames: usize) {
        self.frames_emitted += frames as u64;
    }

    fn audio_time(&self) -> Duration {
        Duration::from_secs_f64(self.frames_emitted as f64 / TARGET_SAMPLE_RATE as f64)
    }

    fn ahead(&self) -> Duration {
        self.audio_time().saturating_sub(self.started.elapsed())
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), TranscodeError> {
    if cancel.is_cancelled() {
        Err(TranscodeError::Cancelled)
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeEngine {
    pacing: Pacing,
    sleep_quantum: Duration,
}

impl Default for TranscodeEngine {
    fn default() -> Self {
        Self::new(Pacing::RealTime)
    }
}

impl TranscodeEngine {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            sleep_quantum: SLEEP_QUANTUM,
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Transcodifica `input` hasta agotarlo, cancelar o fallar.
    ///
    /// La entrada se libera antes de volver, en cualquier caso. Una lectura
    /// bloqueada en la red se corta al dispararse `cancel`.
    pub fn run(
        &self,
        mut input: Box<dyn MediaInput>,
        sink: &mut dyn PcmSink,
        cancel: &CancellationToken,
        controls: &PlaybackControls,
    ) -> Result<Outcome, TranscodeError> {
        input.bind_cancel(cancel.clone());
        let rewindable = input.can_rewind();
        let shared: SharedInput = Arc::new(Mutex::new(input));
        let mut encoder = PcmEncoder::new();
        let mut clock = PaceClock::start();
        controls.reset_clock();

        let result = self.run_passes(
            &shared,
            rewindable,
            sink,
            cancel,
            controls,
            &mut encoder,
            &mut clock,
        );
        drop(shared);

        match result {
            Ok(()) => Ok(Outcome::Finished),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!("⏭️ Transcodificación cancelada");
                Ok(Outcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_passes(
        &self,
        shared: &SharedInput,
        rewindable: bool,
        sink: &mut dyn PcmSink,
        cancel: &CancellationToken,
        controls: &PlaybackControls,
        encoder: &mut PcmEncoder,
        clock: &mut PaceClock,
    ) -> Result<(), TranscodeError> {
        let mut pass = 0u32;
        loop {
            pass += 1;
            self.play_pass(shared, sink, cancel, controls, encoder, clock)?;
            sink.flush_pcm().map_err(TranscodeError::Sink)?;

            if !controls.is_looping() {
                return Ok(());
            }
            if !rewindable {
                warn!("🔂 La entrada no se puede rebobinar, se desactiva la repetición");
                controls.set_looping(false);
                return Ok(());
            }

            check_cancel(cancel)?;
            shared.lock().rewind()?;
            info!("🔂 Repitiendo (pasada {})", pass + 1);
        }
    }

    fn play_pass(
        &self,
        shared: &SharedInput,
        sink: &mut dyn PcmSink,
        cancel: &CancellationToken,
        controls: &PlaybackControls,
        encoder: &mut PcmEncoder,
        clock: &mut PaceClock,
    ) -> Result<(), TranscodeError> {
        check_cancel(cancel)?;
        let mut pipeline = Pipeline::open(shared.clone())?;
        controls.set_position(Duration::ZERO);
        controls.set_duration(pipeline.duration());
        debug!("🎼 Decodificando {}", pipeline.codec_name());

        loop {
            check_cancel(cancel)?;
            match pipeline.decode_next()? {
                Decoded::EndOfStream => break,
                Decoded::Skipped => continue,
                Decoded::Frames { position } => {
                    check_cancel(cancel)?;
                    if let Some(position) = position {
                        controls.set_position(position);
                    }
                    self.emit(&mut pipeline, sink, cancel, controls, encoder, clock)?;
                }
            }
        }

        pipeline.finish()?;
        self.emit(&mut pipeline, sink, cancel, controls, encoder, clock)
    }

    fn emit(
        &self,
        pipeline: &mut Pipeline,
        sink: &mut dyn PcmSink,
        cancel: &CancellationToken,
        controls: &PlaybackControls,
        encoder: &mut PcmEncoder,
        clock: &mut PaceClock,
    ) -> Result<(), TranscodeError> {
        let (left, right) = pipeline.output();
        let frames = left.len();
        if frames == 0 {
            return Ok(());
        }

        let gain = pcm::gain_q16(controls.volume());
        let bytes = encoder.encode(left, right, gain);
        sink.write_pcm(bytes).map_err(TranscodeError::Sink)?;
        pipeline.clear_output();

        clock.advance(frames);
        self.pace(clock, cancel)
    }

    fn pace(&self, clock: &PaceClock, cancel: &CancellationToken) -> Result<(), TranscodeError> {
        if self.pacing == Pacing::Unthrottled {
            return Ok(());
        }
        loop {
            check_cancel(cancel)?;
            let ahead = clock.ahead();
            if ahead <= PACING_SLACK {
                return Ok(());
            }
            std::thread::sleep(ahead.min(self.sleep_quantum));
        }
    }
}
