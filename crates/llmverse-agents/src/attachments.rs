use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use llmverse_common::{ContentBlock, Error, Result};
use reqwest::Client;

/// Downloads an attachment so it can be sent inline to providers that do
/// not take image URLs.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ContentBlock>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Guess a media type from the URL path when the server does not send one.
fn media_type_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    match path.rsplit('.').next() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<ContentBlock> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Input(format!("failed to download image: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Input(format!(
                "failed to download image: {}",
                response.status()
            )));
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| media_type_from_url(url).to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Input(format!("failed to read image: {e}")))?;

        Ok(ContentBlock::ImageData {
            media_type,
            data: BASE64.encode(bytes),
        })
    }
}
