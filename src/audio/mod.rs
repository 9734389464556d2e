//! # Audio Module
//!
//! Núcleo de reproducción: de una entrada de bytes cualquiera a un flujo
//! PCM continuo por contexto.
//!
//! ## Componentes
//!
//! ### [`transcode`] - Motor de transcodificación
//! - Decodifica con symphonia sobre entradas sin seek
//! - Mezcla a estéreo y remuestrea a 48 kHz con rubato
//! - Volumen en dominio entero con saturación, ritmo de tiempo real
//!
//! ### [`queue`] - Cola de reproducción
//! - FIFO con inserción al frente ("play next")
//! - Mezcla Fisher–Yates de toda la cola
//!
//! ### [`player`] - Controlador de reproducción
//! - Máquina de estados por contexto con cancelación cooperativa
//! - Los fallos por track nunca terminan la sesión
//!
//! ### [`registry`] - Registro de sesiones
//! - Un controlador por contexto, retirado al terminar
//!
//! ## Formato de salida
//!
//! - **Sample Rate**: 48kHz
//! - **Bit Depth**: 16-bit signed little-endian
//! - **Channels**: Stereo (2 channels)

pub mod controls;
pub mod player;
pub mod queue;
pub mod registry;
pub mod transcode;

pub use player::{
    ControllerSettings, PlaybackController, PlaybackStatus, SessionEvent, SessionPhase,
    TerminationReason,
};
pub use registry::SessionRegistry;
