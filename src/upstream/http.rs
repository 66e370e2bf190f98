use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{GameLibrary, TitlePlaytime};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Game-library client against the REST API reporting per-title cumulative
/// playtime. Authentication is a bearer token; refresh is out of scope here
/// and handled by whoever provisions the token.
pub struct HttpGameLibrary {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct RawTitle {
    id: String,
    #[serde(default)]
    playtime_minutes: i64,
}

impl HttpGameLibrary {
    pub fn new(base_url: String, token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build upstream http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl GameLibrary for HttpGameLibrary {
    async fn playtimes(&self) -> Result<Vec<TitlePlaytime>> {
        let response = self
            .client
            .get(format!("{}/titles", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to reach the game library")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Game library returned {status}: {body}");
        }

        let titles: Vec<RawTitle> = response
            .json()
            .await
            .context("Failed to parse game library response")?;

        Ok(titles
            .into_iter()
            .map(|raw| TitlePlaytime {
                id: raw.id.into(),
                minutes: raw.playtime_minutes,
            })
            .collect())
    }
}
