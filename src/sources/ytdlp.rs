//! Último recurso: cualquier URL que entienda yt-dlp.
//!
//! Los metadatos salen de `--dump-json` (una línea JSON por entrada) y el
//! audio del stdout del proceso (`-o -`), leído mientras se reproduce.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

use super::{duration_from_secs, parse_url, MediaResolver, SourceKind, Track};
use crate::audio::transcode::{MediaInput, ProcessInput};

const COMMON_ARGS: [&str; 5] = [
    "--no-check-certificate",
    "--geo-bypass",
    "--ignore-errors",
    "--socket-timeout",
    "30",
];

/// Tiempo máximo de una extracción de metadatos.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

pub struct YtDlpResolver {
    binary: String,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, cookies: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies,
            timeout: DEFAULT_METADATA_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ejecuta yt-dlp hasta que termine o venza el plazo; al vencer, el
    /// proceso se mata.
    async fn run_bounded(&self, args: &[String]) -> Result<std::process::Output> {
        let mut command = async_process::Command::new(&self.binary);
        command.args(args).kill_on_drop(true);
        tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow::anyhow!("{} no terminó en {:?}", self.binary, self.timeout))?
            .with_context(|| format!("no se pudo ejecutar {}", self.binary))
    }

    /// Versión instalada, o error si el binario no está disponible.
    pub async fn verify(&self) -> Result<String> {
        let output = self
            .run_bounded(&["--version".to_string()])
            .await
            .with_context(|| format!("{} no encontrado", self.binary))?;
        if !output.status.success() {
            anyhow::bail!("{} --version falló", self.binary);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn cookie_args(&self) -> Vec<String> {
        match &self.cookies {
            Some(path) if path.exists() => vec!["--cookies".into(), path.display().to_string()],
            _ => Vec::new(),
        }
    }

    fn parse_entries(query: &str, stdout: &str) -> Vec<Track> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_str::<Entry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Línea de yt-dlp ignorada: {}", e);
                    None
                }
            })
            .filter_map(|entry| Self::to_track(query, entry))
            .collect()
    }

    fn to_track(query: &str, entry: Entry) -> Option<Track> {
        let url = entry.webpage_url.or(entry.url)?;
        let title = entry.title.unwrap_or_else(|| url.clone());
        let mut track = Track::new(query, url, title, SourceKind::Ytdlp);
        if let Some(artist) = entry.uploader.or(entry.channel) {
            track = track.with_artist(artist);
        }
        if let Some(duration) = entry.duration.and_then(duration_from_secs) {
            track = track.with_duration(duration);
        }
        let thumbnail = entry
            .thumbnail
            .or_else(|| entry.thumbnails.into_iter().last().map(|t| t.url));
        if let Some(thumbnail) = thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        Some(track)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "ytdlp"
    }

    fn can_resolve(&self, query: &str) -> bool {
        parse_url(query).is_some()
    }

    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        info!("🔍 yt-dlp extrayendo metadatos: {}", query);
        let args: Vec<String> = ["--skip-download", "-f", "bestaudio", "--dump-json", "--flat-playlist"]
            .into_iter()
            .chain(COMMON_ARGS)
            .map(String::from)
            .chain(self.cookie_args())
            .chain([query.to_string()])
            .collect();
        let output = self.run_bounded(&args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tracks = Self::parse_entries(query, &stdout);
        if tracks.is_empty() && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp falló: {}", stderr.trim());
        }
        Ok(tracks)
    }

    fn can_get_stream(&self, track: &Track) -> bool {
        matches!(track.kind, SourceKind::YouTube | SourceKind::Ytdlp)
    }

    async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>> {
        let child = tokio::process::Command::new(&self.binary)
            .args(["-f", "bestaudio", "--concurrent-fragments", "12"])
            .args(COMMON_ARGS)
            .args(self.cookie_args())
            .args(["-o", "-"])
            .arg(&track.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("no se pudo lanzar {}", self.binary))?;
        debug!("🎬 yt-dlp transmitiendo {}", track.url);

        let input = ProcessInput::new(child).context("yt-dlp sin stdout")?;
        Ok(Box::new(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_parses_flat_playlist_lines() {
        let stdout = r#"
{"_type": "url", "url": "https://www.youtube.com/watch?v=aaaaaaaaaaa", "title": "One", "channel": "Chan", "duration": 61.0}
not json
{"title": "Two", "webpage_url": "https://vimeo.com/1", "url": "https://cdn/2", "uploader": "Up", "thumbnails": [{"url": "small"}, {"url": "big"}]}
{"title": "No url"}
"#;
        let tracks = YtDlpResolver::parse_entries("q", stdout);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].url, "https://www.youtube.com/watch?v=aaaaaaaaaaa");
        assert_eq!(tracks[0].artist.as_deref(), Some("Chan"));
        assert_eq!(tracks[0].duration, Some(Duration::from_secs(61)));
        assert_eq!(tracks[1].url, "https://vimeo.com/1");
        assert_eq!(tracks[1].thumbnail.as_deref(), Some("big"));
        assert_eq!(tracks[1].kind, SourceKind::Ytdlp);
    }

    #[test]
    fn test_accepts_any_url() {
        let r = YtDlpResolver::new("yt-dlp", None);
        assert!(r.can_resolve("https://vimeo.com/1"));
        assert!(!r.can_resolve("lofi beats"));
        assert!(r.can_get_stream(&Track::new("q", "u", "t", SourceKind::YouTube)));
        assert!(!r.can_get_stream(&Track::new("q", "u", "t", SourceKind::SoundCloud)));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_resolution() {
        let r = YtDlpResolver::new("definitely-not-a-real-binary-xyz", None);
        assert!(r.resolve("https://example.com/v").await.is_err());
        assert!(r.verify().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_extractor_is_killed_after_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("yt-dlp");
        std::fs::write(&script, "#!/bin/sh\nsleep 3600\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let r = YtDlpResolver::new(script.display().to_string(), None)
            .with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), r.resolve("https://vimeo.com/1"))
            .await
            .expect("resolve quedó colgado");

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
