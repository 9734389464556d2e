//! # Errores tipados
//!
//! Tres familias: resolución de fuentes, transcodificación de un track y
//! sesión. Los fallos de resolución y de cada track se capturan en el
//! controlador de reproducción y se convierten en
//! [`SessionEvent::TrackFailed`](crate::audio::player::SessionEvent); solo
//! [`SessionError`] llega a la capa de comandos.

use thiserror::Error;

/// Fallos de la cadena de resolución.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("La búsqueda está vacía")]
    EmptyQuery,

    /// Ningún backend devolvió tracks. Se muestra al usuario, no se loguea como error.
    #[error("No se encontraron resultados para `{query}`")]
    NotFound { query: String },

    /// Catálogo protegido sin enlace equivalente en una plataforma reproducible.
    #[error("No se puede reproducir esta plataforma: {query}. No hay alternativa reproducible")]
    UnsupportedPlatform { query: String },

    /// Los metadatos se resolvieron, pero ningún backend pudo abrir el audio.
    #[error("No se pudo obtener un stream reproducible para `{title}`")]
    NoPlayableStream { title: String },

    #[error("Falló la traducción del enlace: {0}")]
    Translation(String),
}

/// Fallos de una ejecución del transcodificador.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("No se pudo abrir la entrada, el archivo puede estar corrupto: {0}")]
    Probe(String),

    #[error("El contenido no tiene pista de audio")]
    NoAudioTrack,

    /// Separado de [`TranscodeError::Decode`] para poder nombrar el códec.
    #[error("Códec de audio no soportado `{codec}`")]
    UnsupportedCodec { codec: String },

    #[error("Datos corruptos o inválidos al decodificar: {0}")]
    Decode(String),

    #[error("Error al remuestrear: {0}")]
    Resample(String),

    #[error("La salida rechazó el audio: {0}")]
    Sink(std::io::Error),

    /// Cancelación cooperativa. No es un fallo.
    #[error("Reproducción cancelada")]
    Cancelled,
}

impl TranscodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranscodeError::Cancelled)
    }

    /// Causa corta para un mensaje de chat.
    pub fn user_message(&self) -> String {
        match self {
            TranscodeError::Io(_) => "Ocurrió un error de red al transmitir la canción.".to_string(),
            TranscodeError::UnsupportedCodec { codec } => {
                format!("El formato de audio `{}` no está soportado.", codec)
            }
            TranscodeError::Cancelled => "La reproducción fue cancelada.".to_string(),
            other => format!("Ocurrió un error al decodificar: {}", other),
        }
    }
}

impl From<symphonia::core::errors::Error> for TranscodeError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error as SymphoniaError;
        match err {
            SymphoniaError::IoError(e) => TranscodeError::Io(e),
            SymphoniaError::Unsupported(what) => TranscodeError::UnsupportedCodec {
                codec: what.to_string(),
            },
            other => TranscodeError::Decode(other.to_string()),
        }
    }
}

/// Fallos visibles para quien maneja una sesión.
#[derive(Error, Debug)]
pub enum SessionError {
    /// El controlador ya terminó; el registro lo reemplaza.
    #[error("La sesión de reproducción ya terminó")]
    SessionClosed,

    #[error("Falló la conexión de voz: {0}")]
    Voice(String),

    /// La tarea de decodificación terminó de forma anormal.
    #[error("Falló la tarea de reproducción: {0}")]
    Task(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
