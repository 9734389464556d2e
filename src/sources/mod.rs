//! # Fuentes de música
//!
//! Cada backend implementa [`MediaResolver`]: dos comprobaciones baratas
//! (`can_resolve`, `can_get_stream`) y dos operaciones caras (`resolve`,
//! `get_stream`). La [`ResolutionChain`] los prueba en orden de prioridad.
//!
//! ## Backends
//!
//! - [`DirectUrlResolver`]: archivos multimedia por http(s) (y `file://` si se habilita)
//! - [`SoundCloudResolver`]: API v2 con `client_id` descubierto del sitio
//! - [`CobaltResolver`]: instancia de Cobalt (túneles firmados)
//! - [`InvidiousResolver`]: YouTube y búsquedas de texto vía Invidious
//! - [`YtDlpResolver`]: último recurso, cualquier URL que entienda yt-dlp
//!
//! Los enlaces de catálogos protegidos (Spotify, Apple Music, ...) se
//! traducen antes con un [`LinkTranslator`] ([`OdesliClient`]).

pub mod chain;
pub mod cobalt;
pub mod direct_url;
pub mod invidious;
pub mod odesli;
pub mod soundcloud;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::audio::transcode::io::STREAM_READ_TIMEOUT;
use crate::audio::transcode::{HttpInput, MediaInput};

pub use chain::ResolutionChain;
pub use cobalt::CobaltResolver;
pub use direct_url::DirectUrlResolver;
pub use invidious::InvidiousResolver;
pub use odesli::OdesliClient;
pub use soundcloud::SoundCloudResolver;
pub use ytdlp::YtDlpResolver;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Backend que produjo un track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Direct,
    SoundCloud,
    Cobalt,
    YouTube,
    Ytdlp,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Direct => "direct",
            SourceKind::SoundCloud => "soundcloud",
            SourceKind::Cobalt => "cobalt",
            SourceKind::YouTube => "youtube",
            SourceKind::Ytdlp => "ytdlp",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor inmutable de un elemento reproducible.
///
/// El único estado interior es el stream pre-abierto, que se consume una vez.
pub struct Track {
    pub query: String,
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub kind: SourceKind,
    prefetched: Mutex<Option<Box<dyn MediaInput>>>,
}

impl Track {
    pub fn new(
        query: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        kind: SourceKind,
    ) -> Self {
        Self {
            query: query.into(),
            url: url.into(),
            title: title.into(),
            artist: None,
            duration: None,
            thumbnail: None,
            kind,
            prefetched: Mutex::new(None),
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_prefetched(self, input: Box<dyn MediaInput>) -> Self {
        *self.prefetched.lock() = Some(input);
        self
    }

    pub fn has_prefetched(&self) -> bool {
        self.prefetched.lock().is_some()
    }

    /// Entrega el stream pre-abierto, si queda.
    pub fn take_prefetched(&self) -> Option<Box<dyn MediaInput>> {
        self.prefetched.lock().take()
    }

    /// "Artista - Título" o solo el título.
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) if !artist.is_empty() => format!("{} - {}", artist, self.title),
            _ => self.title.clone(),
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("title", &self.title)
            .field("url", &self.url)
            .field("artist", &self.artist)
            .field("duration", &self.duration)
            .field("kind", &self.kind)
            .field("prefetched", &self.has_prefetched())
            .finish()
    }
}

/// Contrato de un backend de resolución.
///
/// `resolve` devuelve una lista vacía cuando no encuentra nada; un `Err`
/// también hace que la cadena pase al siguiente backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Nombre por defecto para el registro y los logs.
    fn name(&self) -> &'static str;

    fn can_resolve(&self, query: &str) -> bool;

    async fn resolve(&self, query: &str) -> Result<Vec<Track>>;

    fn can_get_stream(&self, track: &Track) -> bool;

    async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>>;
}

/// Metadatos de registro de un backend, inyectados al construir la cadena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverRegistration {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
}

impl ResolverRegistration {
    pub fn new(name: impl Into<String>, priority: i32, enabled: bool) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled,
        }
    }
}

/// Traduce un enlace de una plataforma no reproducible a otra equivalente.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkTranslator: Send + Sync {
    async fn translate(&self, url: &str) -> Result<Option<String>>;
}

/// URL absoluta http(s) o file, o `None` si la consulta es texto libre.
pub fn parse_url(query: &str) -> Option<Url> {
    let url = Url::parse(query.trim()).ok()?;
    match url.scheme() {
        "http" | "https" | "file" => Some(url),
        _ => None,
    }
}

/// El host coincide completo, o por sus dos últimas etiquetas, con algún dominio.
pub fn host_matches(host: &str, domains: &[&str]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    let tail = if labels.len() >= 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host.clone()
    };
    domains.iter().any(|d| *d == host || *d == tail)
}

pub fn url_host_matches(query: &str, domains: &[&str]) -> bool {
    parse_url(query)
        .and_then(|u| u.host_str().map(|h| host_matches(h, domains)))
        .unwrap_or(false)
}

/// Espera máxima por las cabeceras de un stream de audio.
pub const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Cliente HTTP compartido por los backends.
///
/// Limita la conexión y el silencio entre lecturas, no la duración total:
/// los streams de audio duran lo que dure la canción. Las llamadas a APIs
/// ponen su propio `timeout` por petición.
pub fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .read_timeout(STREAM_READ_TIMEOUT)
        .build()?)
}

/// Abre un stream de audio por HTTP con espera de cabeceras acotada.
pub(crate) async fn open_http_stream(
    http: &reqwest::Client,
    url: impl reqwest::IntoUrl,
) -> Result<HttpInput> {
    let response = tokio::time::timeout(STREAM_OPEN_TIMEOUT, http.get(url).send())
        .await
        .map_err(|_| anyhow::anyhow!("el servidor no respondió en {:?}", STREAM_OPEN_TIMEOUT))??
        .error_for_status()?;
    Ok(HttpInput::new(response))
}

/// Duración en segundos enteros o fraccionarios tal como la dan las APIs.
pub(crate) fn duration_from_secs(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
}
