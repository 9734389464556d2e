//! Backend de Cobalt: una instancia propia que devuelve túneles de audio.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{open_http_stream, parse_url, MediaResolver, SourceKind, Track};
use crate::audio::transcode::MediaInput;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest<'a> {
    url: &'a str,
    download_mode: &'static str,
    audio_format: &'static str,
    audio_bitrate: &'static str,
    filename_style: &'static str,
}

impl<'a> CobaltRequest<'a> {
    fn audio(url: &'a str) -> Self {
        Self {
            url,
            download_mode: "audio",
            audio_format: "mp3",
            audio_bitrate: "128",
            filename_style: "basic",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OutputMetadata {
    title: Option<String>,
    artist: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Output {
    filename: Option<String>,
    #[serde(default)]
    metadata: OutputMetadata,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
enum CobaltResponse {
    Tunnel {
        url: String,
        filename: Option<String>,
    },
    Redirect {
        url: String,
        filename: Option<String>,
    },
    LocalProcessing {
        #[serde(default)]
        tunnel: Vec<String>,
        output: Option<Output>,
    },
    Picker {},
    Error {
        error: ErrorBody,
    },
}

/// Resultado útil de una petición a Cobalt.
#[derive(Debug, PartialEq, Eq)]
struct CobaltMedia {
    tunnel: String,
    title: Option<String>,
    artist: Option<String>,
}

impl CobaltMedia {
    fn from_filename(url: String, filename: Option<String>) -> Self {
        let title = filename.map(|f| match f.rsplit_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => f,
        });
        Self {
            tunnel: url,
            title,
            artist: None,
        }
    }
}

fn interpret(response: CobaltResponse) -> Result<CobaltMedia> {
    match response {
        CobaltResponse::Tunnel { url, filename } | CobaltResponse::Redirect { url, filename } => {
            Ok(CobaltMedia::from_filename(url, filename))
        }
        CobaltResponse::LocalProcessing { tunnel, output } => {
            let url = tunnel
                .into_iter()
                .next()
                .context("Cobalt no devolvió ningún túnel")?;
            let Some(output) = output else {
                return Ok(CobaltMedia::from_filename(url, None));
            };
            let mut media = CobaltMedia::from_filename(url, output.filename);
            if output.metadata.title.is_some() {
                media.title = output.metadata.title;
            }
            media.artist = output.metadata.artist;
            Ok(media)
        }
        CobaltResponse::Picker {} => anyhow::bail!("Cobalt devolvió un selector múltiple, no soportado"),
        CobaltResponse::Error { error } => anyhow::bail!("Cobalt respondió con error: {}", error.code),
    }
}

pub struct CobaltResolver {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    prefetch_limit: u64,
}

impl CobaltResolver {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        prefetch_limit: u64,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
            timeout,
            prefetch_limit,
        }
    }

    async fn request(&self, url: &str) -> Result<CobaltMedia> {
        let mut request = self
            .http
            .post(&self.base_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&CobaltRequest::audio(url))
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Api-Key {}", key));
        }
        let response: CobaltResponse = request
            .send()
            .await
            .context("Error en request a Cobalt")?
            .error_for_status()?
            .json()
            .await
            .context("Respuesta de Cobalt inválida")?;
        interpret(response)
    }

    /// Descarga el túnel entero si cabe en el límite; `None` si no cabe.
    async fn prefetch(&self, tunnel: &str) -> Result<Option<Bytes>> {
        let mut response = self
            .http
            .get(tunnel)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        if response.content_length().is_some_and(|len| len > self.prefetch_limit) {
            return Ok(None);
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if buffer.len() as u64 + chunk.len() as u64 > self.prefetch_limit {
                debug!("📦 Túnel supera {} bytes, se transmitirá en vivo", self.prefetch_limit);
                return Ok(None);
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(Some(buffer.freeze()))
    }
}

#[async_trait]
impl MediaResolver for CobaltResolver {
    fn name(&self) -> &'static str {
        "cobalt"
    }

    fn can_resolve(&self, query: &str) -> bool {
        parse_url(query).is_some_and(|u| u.scheme() != "file")
    }

    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let media = self.request(query).await?;
        let title = media.title.clone().unwrap_or_else(|| query.to_string());
        let mut track = Track::new(query, query, title, SourceKind::Cobalt);
        if let Some(artist) = media.artist {
            track = track.with_artist(artist);
        }

        match self.prefetch(&media.tunnel).await {
            Ok(Some(bytes)) => {
                info!("📦 Túnel de Cobalt descargado ({} bytes)", bytes.len());
                track = track.with_prefetched(Box::new(Cursor::new(bytes)));
            }
            Ok(None) => {}
            Err(e) => warn!("⚠️ No se pudo descargar el túnel de Cobalt: {:#}", e),
        }
        Ok(vec![track])
    }

    fn can_get_stream(&self, track: &Track) -> bool {
        matches!(
            track.kind,
            SourceKind::Cobalt | SourceKind::YouTube | SourceKind::SoundCloud
        )
    }

    async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>> {
        let media = self.request(&track.url).await?;
        Ok(Box::new(open_http_stream(&self.http, &media.tunnel).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> Result<CobaltMedia> {
        interpret(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_tunnel_and_redirect() {
        let media = parse(r#"{"status": "tunnel", "url": "https://co/t/1", "filename": "My Song.mp3"}"#).unwrap();
        assert_eq!(
            media,
            CobaltMedia {
                tunnel: "https://co/t/1".into(),
                title: Some("My Song".into()),
                artist: None,
            }
        );

        let media = parse(r#"{"status": "redirect", "url": "https://cdn/x"}"#).unwrap();
        assert_eq!(media.tunnel, "https://cdn/x");
        assert_eq!(media.title, None);
    }

    #[test]
    fn test_local_processing_metadata() {
        let media = parse(
            r#"{
                "status": "local-processing",
                "type": "audio",
                "service": "youtube",
                "tunnel": ["https://co/t/a", "https://co/t/b"],
                "output": {"type": "audio/mpeg", "filename": "file.mp3",
                           "metadata": {"title": "Title", "artist": "Artist"}},
                "isHLS": false
            }"#,
        )
        .unwrap();
        assert_eq!(media.tunnel, "https://co/t/a");
        assert_eq!(media.title.as_deref(), Some("Title"));
        assert_eq!(media.artist.as_deref(), Some("Artist"));
    }

    #[test]
    fn test_picker_and_error_are_rejected() {
        assert!(parse(r#"{"status": "picker", "picker": []}"#).is_err());
        let err = parse(r#"{"status": "error", "error": {"code": "error.api.link.invalid"}}"#).unwrap_err();
        assert!(err.to_string().contains("error.api.link.invalid"));
        assert!(parse(r#"{"status": "local-processing", "tunnel": []}"#).is_err());
    }

    #[test]
    fn test_accepts_non_file_urls() {
        let r = CobaltResolver::new(
            reqwest::Client::new(),
            "http://localhost:9000/",
            None,
            Duration::from_secs(5),
            1024,
        );
        assert!(r.can_resolve("https://www.youtube.com/watch?v=abc"));
        assert!(!r.can_resolve("file:///tmp/a.mp3"));
        assert!(!r.can_resolve("some search"));

        let yt = Track::new("q", "u", "t", SourceKind::YouTube);
        let direct = Track::new("q", "u", "t", SourceKind::Direct);
        assert!(r.can_get_stream(&yt));
        assert!(!r.can_get_stream(&direct));
    }

    #[tokio::test]
    async fn test_prefetch_gives_up_on_stalled_tunnel() {
        let url = crate::audio::transcode::io::tests::stalled_server(b"hola".to_vec()).await;
        let resolver = CobaltResolver::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            Duration::from_millis(300),
            64 * 1024 * 1024,
        );

        let result = tokio::time::timeout(Duration::from_secs(5), resolver.prefetch(&url))
            .await
            .expect("la descarga previa quedó colgada");
        assert!(result.is_err());
    }
}
