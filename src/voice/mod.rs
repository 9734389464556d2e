//! # Transporte de voz
//!
//! El controlador solo conoce estos contratos: conectar a un destino,
//! abrir un sink PCM, cerrar, y una señal que se dispara si la conexión
//! se pierde desde fuera. [`discord::SongbirdConnector`] los implementa
//! sobre songbird.

pub mod discord;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audio::transcode::PcmSink;
use crate::error::SessionError;

pub use discord::SongbirdConnector;

/// Identificador de un contexto de escucha (el guild en Discord).
pub type ContextId = u64;

/// Dónde debe sonar una sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceTarget {
    pub context: ContextId,
    pub channel: u64,
}

impl VoiceTarget {
    pub fn new(context: ContextId, channel: u64) -> Self {
        Self { context, channel }
    }
}

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, target: VoiceTarget) -> Result<Arc<dyn VoiceConnection>, SessionError>;
}

/// Una conexión de voz activa.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Abre el flujo PCM continuo de la sesión. Se llama una sola vez.
    async fn start(&self) -> Result<Box<dyn PcmSink>, SessionError>;

    /// Libera la conexión. Debe tolerar llamadas repetidas.
    async fn close(&self);

    /// Se cancela cuando la conexión se pierde sin que la sesión lo pida.
    fn disconnected(&self) -> CancellationToken;
}
