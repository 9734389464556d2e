//! Controles compartidos entre el controlador y el hilo de decodificación.
//!
//! Todo es atómico: el transcodificador los lee en cada frame sin bloquear.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::audio::transcode::pcm::clamp_volume;

const UNKNOWN_DURATION: u64 = u64::MAX;

#[derive(Debug)]
pub struct PlaybackControls {
    volume_bits: AtomicU32,
    looping: AtomicBool,
    position_ms: AtomicU64,
    duration_ms: AtomicU64,
}

impl PlaybackControls {
    pub fn new(volume: f32) -> Self {
        Self {
            volume_bits: AtomicU32::new(clamp_volume(volume).to_bits()),
            looping: AtomicBool::new(false),
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(UNKNOWN_DURATION),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Devuelve el volumen efectivo tras limitarlo a 0.0–2.0.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let clamped = clamp_volume(volume);
        self.volume_bits.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    /// Invierte el flag y devuelve el nuevo valor.
    pub fn toggle_looping(&self) -> bool {
        !self.looping.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms.load(Ordering::Relaxed))
    }

    pub fn set_position(&self, position: Duration) {
        self.position_ms
            .store(position.as_millis() as u64, Ordering::Relaxed);
    }

    /// `None` cuando el contenedor no informa la duración.
    pub fn duration(&self) -> Option<Duration> {
        match self.duration_ms.load(Ordering::Relaxed) {
            UNKNOWN_DURATION => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_duration(&self, duration: Option<Duration>) {
        let ms = duration.map_or(UNKNOWN_DURATION, |d| d.as_millis() as u64);
        self.duration_ms.store(ms, Ordering::Relaxed);
    }

    pub fn reset_clock(&self) {
        self.set_position(Duration::ZERO);
        self.set_duration(None);
    }
}

impl Default for PlaybackControls {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_is_clamped_on_set() {
        let controls = PlaybackControls::default();
        assert_eq!(controls.volume(), 0.5);
        assert_eq!(controls.set_volume(3.0), 2.0);
        assert_eq!(controls.volume(), 2.0);
        assert_eq!(controls.set_volume(-0.5), 0.0);
    }

    #[test]
    fn test_toggle_looping() {
        let controls = PlaybackControls::default();
        assert!(controls.toggle_looping());
        assert!(controls.is_looping());
        assert!(!controls.toggle_looping());
        assert!(!controls.is_looping());
    }

    #[test]
    fn test_clock_reset() {
        let controls = PlaybackControls::default();
        controls.set_position(Duration::from_secs(3));
        controls.set_duration(Some(Duration::from_secs(10)));
        assert_eq!(controls.duration(), Some(Duration::from_secs(10)));
        controls.reset_clock();
        assert_eq!(controls.position(), Duration::ZERO);
        assert_eq!(controls.duration(), None);
    }
}
