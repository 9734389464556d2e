//! Cadena de resolución: prueba los backends por prioridad (menor primero).
//!
//! Un backend que falla nunca corta la cadena. La cadena no sabe qué
//! backends concretos tiene registrados.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{parse_url, url_host_matches, LinkTranslator, MediaResolver, ResolverRegistration, Track};
use crate::audio::transcode::MediaInput;
use crate::error::ResolveError;

/// Catálogos protegidos que ningún backend reproduce.
pub const UNPLAYABLE_HOSTS: &[&str] = &[
    "spotify.com",
    "open.spotify.com",
    "music.apple.com",
    "deezer.com",
    "tidal.com",
    "amazon.com",
];

pub fn is_unplayable(query: &str) -> bool {
    url_host_matches(query, UNPLAYABLE_HOSTS)
}

struct RegisteredResolver {
    registration: ResolverRegistration,
    backend: Arc<dyn MediaResolver>,
}

pub struct ResolutionChain {
    resolvers: Vec<RegisteredResolver>,
    translator: Option<Arc<dyn LinkTranslator>>,
    max_tracks: usize,
}

impl ResolutionChain {
    pub fn new(max_tracks: usize) -> Self {
        Self {
            resolvers: Vec::new(),
            translator: None,
            max_tracks: max_tracks.max(1),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn LinkTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Registra un backend. El orden final depende solo de la prioridad;
    /// a igual prioridad gana el registrado antes.
    pub fn register(
        mut self,
        backend: Arc<dyn MediaResolver>,
        registration: ResolverRegistration,
    ) -> Self {
        info!(
            "🔌 Backend registrado: {} (prioridad {}, {})",
            registration.name,
            registration.priority,
            if registration.enabled { "activo" } else { "desactivado" }
        );
        self.resolvers.push(RegisteredResolver {
            registration,
            backend,
        });
        self.resolvers.sort_by_key(|r| r.registration.priority);
        self
    }

    /// Nombres de los backends activos, en el orden en que se prueban.
    pub fn resolver_names(&self) -> Vec<&str> {
        self.enabled().map(|r| r.registration.name.as_str()).collect()
    }

    fn enabled(&self) -> impl Iterator<Item = &RegisteredResolver> {
        self.resolvers.iter().filter(|r| r.registration.enabled)
    }

    /// Sustituye enlaces de catálogos protegidos por uno reproducible.
    async fn pre_resolve(&self, query: &str) -> Result<String, ResolveError> {
        if !is_unplayable(query) {
            return Ok(query.to_string());
        }

        let unsupported = || ResolveError::UnsupportedPlatform {
            query: query.to_string(),
        };
        let Some(translator) = &self.translator else {
            return Err(unsupported());
        };

        match translator.translate(query).await {
            Ok(Some(link)) => {
                info!("🔁 Enlace traducido: {} -> {}", query, link);
                Ok(link)
            }
            Ok(None) => Err(unsupported()),
            Err(e) => {
                warn!("❌ Traducción de enlace falló para {}: {:#}", query, e);
                Err(ResolveError::Translation(format!("{:#}", e)))
            }
        }
    }

    /// Resuelve una consulta. Lista vacía si ningún backend encontró nada.
    pub async fn resolve(&self, query: &str) -> Result<Vec<Arc<Track>>, ResolveError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolveError::EmptyQuery);
        }
        let query = self.pre_resolve(query).await?;
        debug!(
            "🔍 Resolviendo {} ({})",
            query,
            if parse_url(&query).is_some() { "url" } else { "búsqueda" }
        );

        for resolver in self.enabled() {
            let name = &resolver.registration.name;
            if !resolver.backend.can_resolve(&query) {
                continue;
            }

            match resolver.backend.resolve(&query).await {
                Ok(tracks) if !tracks.is_empty() => {
                    let total = tracks.len();
                    let tracks: Vec<Arc<Track>> = tracks
                        .into_iter()
                        .take(self.max_tracks)
                        .map(Arc::new)
                        .collect();
                    info!("✅ {} resolvió {} track(s) de {}", name, tracks.len(), total);
                    return Ok(tracks);
                }
                Ok(_) => debug!("🔍 {} no encontró resultados", name),
                Err(e) => warn!("❌ {} falló resolviendo {}: {:#}", name, query, e),
            }
        }

        Ok(Vec::new())
    }

    /// Abre los bytes de un track ya resuelto.
    pub async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>, ResolveError> {
        if let Some(input) = track.take_prefetched() {
            debug!("📦 Usando stream pre-cargado para {}", track.title);
            return Ok(input);
        }

        for resolver in self.enabled() {
            let name = &resolver.registration.name;
            if !resolver.backend.can_get_stream(track) {
                continue;
            }
            match resolver.backend.get_stream(track).await {
                Ok(input) => {
                    debug!("🎧 Stream de {} abierto con {}", track.title, name);
                    return Ok(input);
                }
                Err(e) => warn!("❌ {} no pudo abrir {}: {:#}", name, track.title, e),
            }
        }

        Err(ResolveError::NoPlayableStream {
            title: track.title.clone(),
        })
    }
}
