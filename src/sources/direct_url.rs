use super::{open_http_stream, parse_url, MediaResolver, SourceKind, Track};
use crate::audio::transcode::MediaInput;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

/// Extensiones que symphonia sabe abrir (audio y contenedores de vídeo con pista de audio).
const MEDIA_EXTENSIONS: [&str; 12] = [
    "mp3", "wav", "flac", "ogg", "opus", "m4a", "aac", "mp4", "m4v", "mov", "webm", "mkv",
];

/// Archivos multimedia servidos tal cual por http(s), o desde disco si se habilita.
pub struct DirectUrlResolver {
    http: reqwest::Client,
    allow_files: bool,
}

impl DirectUrlResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            allow_files: false,
        }
    }

    /// Acepta `file://`. Solo para despliegues donde quien pide canciones
    /// puede leer el disco del host.
    pub fn allow_local_files(mut self, allow: bool) -> Self {
        self.allow_files = allow;
        self
    }

    fn media_url(&self, query: &str) -> Option<Url> {
        let url = parse_url(query)?;
        if url.scheme() == "file" && !self.allow_files {
            return None;
        }
        let extension = url
            .path_segments()?
            .last()?
            .rsplit_once('.')?
            .1
            .to_ascii_lowercase();
        MEDIA_EXTENSIONS
            .contains(&extension.as_str())
            .then_some(url)
    }

    /// Nombre del archivo sin extensión, decodificado.
    fn title_from(url: &Url) -> String {
        let file = url
            .path_segments()
            .and_then(|s| s.last())
            .unwrap_or_default();
        let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
        urlencoding::decode(stem)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| stem.to_string())
    }
}

#[async_trait]
impl MediaResolver for DirectUrlResolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn can_resolve(&self, query: &str) -> bool {
        self.media_url(query).is_some()
    }

    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let Some(url) = self.media_url(query) else {
            return Ok(Vec::new());
        };
        let title = Self::title_from(&url);
        debug!("🔗 Archivo directo: {}", title);
        Ok(vec![Track::new(query, url.as_str(), title, SourceKind::Direct)])
    }

    fn can_get_stream(&self, track: &Track) -> bool {
        track.kind == SourceKind::Direct
    }

    async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>> {
        let url = Url::parse(&track.url).context("URL directa inválida")?;

        if url.scheme() == "file" {
            if !self.allow_files {
                anyhow::bail!("los archivos locales están deshabilitados");
            }
            let path = url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("ruta de archivo inválida: {}", url))?;
            let file = std::fs::File::open(&path)
                .with_context(|| format!("no se pudo abrir {}", path.display()))?;
            return Ok(Box::new(file));
        }

        Ok(Box::new(open_http_stream(&self.http, url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn resolver() -> DirectUrlResolver {
        DirectUrlResolver::new(reqwest::Client::new())
    }

    #[test]
    fn test_accepts_media_extensions_only() {
        let r = resolver();
        assert!(r.can_resolve("https://cdn.example.com/music/song.MP3"));
        assert!(r.can_resolve("https://cdn.example.com/a.flac?token=1"));
        assert!(!r.can_resolve("https://example.com/watch?v=abc"));
        assert!(!r.can_resolve("https://example.com/"));
        assert!(!r.can_resolve("https://example.com/notes.txt"));
        assert!(!r.can_resolve("song.mp3"));
    }

    #[test]
    fn test_accepts_video_containers() {
        let r = resolver();
        for ext in ["mp4", "m4v", "mov", "webm", "mkv"] {
            let url = format!("https://cdn.example.com/clip.{}", ext);
            assert!(r.can_resolve(&url), "{}", url);
        }
    }

    #[tokio::test]
    async fn test_local_files_rejected_by_default() {
        let r = resolver();
        assert!(!r.can_resolve("file:///etc/passwd.wav"));
        assert!(r.resolve("file:///etc/passwd.wav").await.unwrap().is_empty());

        let forged = Track::new("x", "file:///etc/passwd.wav", "x", SourceKind::Direct);
        assert!(r.get_stream(&forged).await.is_err());
    }

    #[tokio::test]
    async fn test_title_is_decoded_stem() {
        let tracks = resolver()
            .resolve("https://example.com/My%20Song.mp3")
            .await
            .unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "My Song");
        assert_eq!(tracks[0].kind, SourceKind::Direct);
    }

    #[tokio::test]
    async fn test_local_file_stream() {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(b"RIFF").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let r = resolver().allow_local_files(true);
        assert!(r.can_resolve("file:///tmp/track.ogg"));
        let tracks = r.resolve(url.as_str()).await.unwrap();
        let mut input = r.get_stream(&tracks[0]).await.unwrap();
        assert!(input.can_rewind());

        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"RIFF");
    }
}
