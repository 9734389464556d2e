//! Traducción de enlaces entre plataformas con la API de Odesli (song.link).

use super::chain::is_unplayable;
use super::LinkTranslator;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const ODESLI_API: &str = "https://api.song.link/v1-alpha.1/links";

/// Plataformas preferidas, en orden.
const PLATFORM_PREFERENCE: [&str; 2] = ["soundcloud", "youtube"];

#[derive(Debug, Deserialize)]
struct LinksResponse {
    #[serde(rename = "linksByPlatform", default)]
    links_by_platform: BTreeMap<String, PlatformLink>,
}

#[derive(Debug, Deserialize)]
struct PlatformLink {
    url: String,
}

pub struct OdesliClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl OdesliClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// SoundCloud, luego YouTube, luego el primero que no sea otro catálogo protegido.
    fn pick_link(links: &BTreeMap<String, PlatformLink>) -> Option<String> {
        PLATFORM_PREFERENCE
            .iter()
            .find_map(|p| links.get(*p))
            .or_else(|| links.values().find(|l| !is_unplayable(&l.url)))
            .map(|l| l.url.clone())
    }
}

#[async_trait]
impl LinkTranslator for OdesliClient {
    async fn translate(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .http
            .get(ODESLI_API)
            .query(&[("url", url)])
            .timeout(self.timeout)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("🔁 Odesli no conoce {}", url);
            return Ok(None);
        }

        let body: LinksResponse = response.error_for_status()?.json().await?;
        Ok(Self::pick_link(&body.links_by_platform))
    }
}
