use async_trait::async_trait;
use llmverse_common::{Error, Result};
use reqwest::Client;
use serde_json::json;

use super::{Tool, ToolContext, string_arg};

const OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Current weather from OpenWeather. Only registered when a key is set.
pub struct WeatherTool {
    client: Client,
    api_key: String,
    url: String,
}

impl WeatherTool {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            url: OPENWEATHER_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "getWeather"
    }

    fn description(&self) -> &'static str {
        "Get the weather for a specific location based on the following location: {location}"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The location to get the weather for, formatted as 'City,Country', e.g. 'New York,US', and the city and country code must be in ISO 3166-1 alpha-2 format"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<String> {
        let location = string_arg(&args, "location")?;

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("mode", "json"),
                ("q", location),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Tool(format!("weather request failed: {}", e.without_url())))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("weather API error ({status}): {body}")));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Tool(format!("failed to read weather response: {e}")))
    }
}
