use async_trait::async_trait;
use llmverse_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{Tool, ToolContext, string_arg};

const IMGUR_API_URL: &str = "https://api.imgur.com/3";

/// DALL-E 3 image generation through the OpenAI images API.
pub struct ImageGenerationTool {
    client: Client,
    api_key: String,
    base_url: String,
    imgur: Option<ImgurUploader>,
}

impl ImageGenerationTool {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            imgur: None,
        }
    }

    /// Re-host generated images on Imgur, since OpenAI image URLs expire.
    pub fn with_imgur(mut self, imgur: ImgurUploader) -> Self {
        self.imgur = Some(imgur);
        self
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/images/generations", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": "dall-e-3",
                "prompt": prompt,
                "size": "1024x1024",
                "n": 1
            }))
            .send()
            .await
            .map_err(|e| Error::Tool(format!("image generation request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!(
                "image generation API error ({status}): {body}"
            )));
        }

        let images: ImagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("failed to parse image response: {e}")))?;

        images
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| Error::Tool("image generation returned no url".to_string()))
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

#[async_trait]
impl Tool for ImageGenerationTool {
    fn name(&self) -> &'static str {
        "generateImage"
    }

    fn description(&self) -> &'static str {
        "Generate a detailed prompt to generate an image based on the following description: {image_desc}"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "image_desc": {
                    "type": "string",
                    "description": "A description of the image to generate"
                }
            },
            "required": ["image_desc"]
        })
    }

    fn available_for(&self, provider: &str) -> bool {
        provider == "openai"
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<String> {
        let description = string_arg(&args, "image_desc")?;
        let mut url = self.generate(description).await?;

        if let Some(imgur) = &self.imgur {
            if imgur.has_capacity().await? {
                debug!(%url, "uploading image to imgur");
                url = imgur.upload(&url, description).await?;
            }
        }

        Ok(format!("the generated image url is: {url}"))
    }
}

/// Anonymous Imgur uploads keyed by a client id.
pub struct ImgurUploader {
    client: Client,
    client_id: String,
    base_url: String,
}

impl ImgurUploader {
    pub fn new(client_id: String) -> Self {
        Self {
            client: Client::new(),
            client_id,
            base_url: IMGUR_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn authorization(&self) -> String {
        format!("Client-ID {}", self.client_id)
    }

    /// False when the client's rate limit is exhausted.
    async fn has_capacity(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/credits", self.base_url))
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| Error::Tool(format!("imgur credits request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Tool(format!(
                "imgur credits error: {}",
                response.status()
            )));
        }

        let credits: ImgurEnvelope<ImgurCredits> = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("failed to parse imgur credits: {e}")))?;

        if credits.data.client_remaining == 0 {
            warn!(
                reset = credits.data.user_reset,
                "imgur rate limit exceeded, keeping original image url"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn upload(&self, image_url: &str, description: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/image", self.base_url))
            .header("Authorization", self.authorization())
            .form(&[
                ("image", image_url),
                ("type", "URL"),
                ("description", description),
            ])
            .send()
            .await
            .map_err(|e| Error::Tool(format!("imgur upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("imgur upload error ({status}): {body}")));
        }

        let uploaded: ImgurEnvelope<ImgurImage> = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("failed to parse imgur upload: {e}")))?;
        Ok(uploaded.data.link)
    }
}

#[derive(Deserialize)]
struct ImgurEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ImgurCredits {
    #[serde(rename = "ClientRemaining")]
    client_remaining: i64,
    #[serde(rename = "UserReset", default)]
    user_reset: i64,
}

#[derive(Deserialize)]
struct ImgurImage {
    link: String,
}
