//! SoundCloud vía la API v2 pública del sitio web.
//!
//! El `client_id` no es fijo: se extrae de los bundles JS de la web y se
//! guarda junto a la versión del sitio (`__sc_version`). Mientras la
//! versión no cambie se reutiliza.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{open_http_stream, url_host_matches, MediaResolver, SourceKind, Track};
use crate::audio::transcode::MediaInput;

const SITE_URL: &str = "https://soundcloud.com";
const API_URL: &str = "https://api-v2.soundcloud.com";
const ASSET_PREFIX: &str = "https://a-v2.sndcdn.com/";

pub const SOUNDCLOUD_HOSTS: &[&str] = &[
    "soundcloud.com",
    "www.soundcloud.com",
    "m.soundcloud.com",
    "on.soundcloud.com",
];

/// Presets progresivos en orden de preferencia.
const PRESET_PREFERENCE: [&str; 2] = ["mp3_", "opus_"];

/// Lote máximo del endpoint `/tracks?ids=`.
const HYDRATE_BATCH: usize = 50;

static VERSION: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"<script>window\.__sc_version="(\d{10})"</script>"#));

static SCRIPT_SRC: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"<script[^>]+src="([^"]+)""#));

static CLIENT_ID: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"\("client_id=([A-Za-z0-9]{32})"\)"#));

fn regex(lazy: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex> {
    lazy.as_ref()
        .map_err(|e| anyhow::anyhow!("regex inválida: {}", e))
}

#[derive(Debug, Clone)]
struct CachedClientId {
    version: String,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct ScUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct ScFormat {
    protocol: String,
    #[serde(default)]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct ScTranscoding {
    url: String,
    #[serde(default)]
    preset: String,
    #[serde(default)]
    snipped: bool,
    format: ScFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ScMedia {
    #[serde(default)]
    transcodings: Vec<ScTranscoding>,
}

#[derive(Debug, Deserialize)]
struct ScTrack {
    id: u64,
    title: Option<String>,
    permalink_url: Option<String>,
    /// Milisegundos.
    duration: Option<u64>,
    artwork_url: Option<String>,
    user: Option<ScUser>,
    policy: Option<String>,
    #[serde(default)]
    media: ScMedia,
    track_authorization: Option<String>,
}

impl ScTrack {
    /// Las entradas de playlist a veces llegan solo con el id.
    fn is_stub(&self) -> bool {
        self.title.is_none() || self.permalink_url.is_none()
    }

    fn is_playable(&self) -> bool {
        let blocked = matches!(self.policy.as_deref(), Some("BLOCK") | Some("SNIP"));
        !blocked && !self.media.transcodings.is_empty()
    }

    /// Transcodificación progresiva completa y sin cifrar, por preset preferido.
    fn pick_transcoding(&self) -> Option<&ScTranscoding> {
        let candidates: Vec<&ScTranscoding> = self
            .media
            .transcodings
            .iter()
            .filter(|t| t.format.protocol == "progressive")
            .filter(|t| !t.snipped)
            .filter(|t| !t.preset.contains("encrypted") && !t.format.mime_type.contains("encrypted"))
            .collect();
        PRESET_PREFERENCE
            .iter()
            .find_map(|p| candidates.iter().copied().find(|t| t.preset.starts_with(p)))
    }
}

#[derive(Debug, Deserialize)]
struct ScPlaylist {
    #[serde(default)]
    tracks: Vec<ScTrack>,
}

#[derive(Debug, Deserialize)]
struct ScStreamUrl {
    url: String,
}

/// Portada en 500x500 en lugar de la miniatura por defecto.
fn upgrade_artwork(url: &str) -> String {
    url.replace("-large.", "-t500x500.")
}

pub struct SoundCloudResolver {
    http: reqwest::Client,
    timeout: Duration,
    cached: Mutex<Option<CachedClientId>>,
}

impl SoundCloudResolver {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout,
            cached: Mutex::new(None),
        }
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    /// `client_id` vigente; se vuelve a descubrir solo si cambió la versión del sitio.
    async fn client_id(&self) -> Result<String> {
        let html = self.get_text(SITE_URL).await?;
        let version = regex(&VERSION)?
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .context("No se encontró __sc_version en SoundCloud")?;

        if let Some(cached) = self.cached.lock().as_ref() {
            if cached.version == version {
                return Ok(cached.client_id.clone());
            }
        }

        let scripts: Vec<String> = regex(&SCRIPT_SRC)?
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .filter(|src| src.starts_with(ASSET_PREFIX))
            .collect();

        // El client_id suele estar en los últimos bundles.
        for src in scripts.iter().rev() {
            let js = match self.get_text(src).await {
                Ok(js) => js,
                Err(e) => {
                    debug!("Bundle {} no disponible: {:#}", src, e);
                    continue;
                }
            };
            let found = regex(&CLIENT_ID)?
                .captures(&js)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            if let Some(client_id) = found {
                info!("🔑 client_id de SoundCloud renovado (versión {})", version);
                *self.cached.lock() = Some(CachedClientId {
                    version,
                    client_id: client_id.clone(),
                });
                return Ok(client_id);
            }
        }

        anyhow::bail!("No se encontró client_id en los scripts de SoundCloud")
    }

    /// Sigue la redirección de los enlaces cortos `on.soundcloud.com`.
    async fn expand_short_link(&self, query: &str) -> Result<String> {
        if !url_host_matches(query, &["on.soundcloud.com"]) {
            return Ok(query.to_string());
        }
        let response = self
            .http
            .get(query)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let expanded = response.url().as_str().to_string();
        debug!("🔗 Enlace corto expandido: {} -> {}", query, expanded);
        Ok(expanded)
    }

    async fn api_resolve(&self, url: &str, client_id: &str) -> Result<serde_json::Value> {
        Ok(self
            .http
            .get(format!("{}/resolve", API_URL))
            .query(&[("url", url), ("client_id", client_id)])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Completa las entradas de playlist que vienen solo con id.
    async fn hydrate(&self, tracks: Vec<ScTrack>, client_id: &str) -> Result<Vec<ScTrack>> {
        let stub_ids: Vec<u64> = tracks.iter().filter(|t| t.is_stub()).map(|t| t.id).collect();
        if stub_ids.is_empty() {
            return Ok(tracks);
        }

        let mut full: Vec<ScTrack> = Vec::with_capacity(stub_ids.len());
        for batch in stub_ids.chunks(HYDRATE_BATCH) {
            let ids = batch
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let fetched: Vec<ScTrack> = self
                .http
                .get(format!("{}/tracks", API_URL))
                .query(&[("ids", ids.as_str()), ("client_id", client_id)])
                .timeout(self.timeout)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            full.extend(fetched);
        }

        let mut ordered = Vec::with_capacity(tracks.len());
        for track in tracks {
            if !track.is_stub() {
                ordered.push(track);
            } else if let Some(pos) = full.iter().position(|f| f.id == track.id) {
                ordered.push(full.swap_remove(pos));
            }
        }
        Ok(ordered)
    }

    fn to_track(query: &str, sc: ScTrack) -> Option<Track> {
        if sc.is_stub() || !sc.is_playable() {
            debug!("⏭️ Track {} de SoundCloud no reproducible", sc.id);
            return None;
        }
        let mut track = Track::new(
            query,
            sc.permalink_url?,
            sc.title?,
            SourceKind::SoundCloud,
        );
        if let Some(user) = sc.user {
            track = track.with_artist(user.username);
        }
        if let Some(ms) = sc.duration.filter(|ms| *ms > 0) {
            track = track.with_duration(Duration::from_millis(ms));
        }
        if let Some(artwork) = sc.artwork_url {
            track = track.with_thumbnail(upgrade_artwork(&artwork));
        }
        Some(track)
    }
}

#[async_trait]
impl MediaResolver for SoundCloudResolver {
    fn name(&self) -> &'static str {
        "soundcloud"
    }

    fn can_resolve(&self, query: &str) -> bool {
        url_host_matches(query, SOUNDCLOUD_HOSTS)
    }

    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let url = self.expand_short_link(query).await?;
        let client_id = self.client_id().await?;
        let value = self.api_resolve(&url, &client_id).await?;

        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .map(str::to_string);
        let tracks = match kind.as_deref() {
            Some("track") => vec![serde_json::from_value::<ScTrack>(value)?],
            Some("playlist") => {
                let playlist: ScPlaylist = serde_json::from_value(value)?;
                self.hydrate(playlist.tracks, &client_id).await?
            }
            other => {
                warn!("⚠️ Recurso de SoundCloud no soportado: {:?}", other);
                Vec::new()
            }
        };

        Ok(tracks
            .into_iter()
            .filter_map(|t| Self::to_track(query, t))
            .collect())
    }

    fn can_get_stream(&self, track: &Track) -> bool {
        track.kind == SourceKind::SoundCloud
    }

    /// Vuelve a resolver el track: las URLs firmadas caducan.
    async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>> {
        let client_id = self.client_id().await?;
        let value = self.api_resolve(&track.url, &client_id).await?;
        let sc: ScTrack = serde_json::from_value(value)?;
        if !sc.is_playable() {
            anyhow::bail!("El track de SoundCloud no se puede reproducir");
        }
        let transcoding = sc
            .pick_transcoding()
            .context("No hay transcodificación progresiva disponible")?;

        let mut query = vec![("client_id", client_id.as_str())];
        if let Some(auth) = sc.track_authorization.as_deref() {
            query.push(("track_authorization", auth));
        }
        let signed: ScStreamUrl = self
            .http
            .get(&transcoding.url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(Box::new(open_http_stream(&self.http, &signed.url).await?))
    }
}
