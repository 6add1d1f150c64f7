use async_trait::async_trait;
use llmverse_common::{Error, Result};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{Tool, ToolContext, string_arg};

const FRANKFURTER_URL: &str = "https://api.frankfurter.app";

/// Currency exchange rates from the Frankfurter API.
pub struct ExchangeRateTool {
    client: Client,
    base_url: String,
}

impl ExchangeRateTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: FRANKFURTER_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for ExchangeRateTool {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_date(value: &str) -> bool {
    if value == "latest" {
        return true;
    }
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

#[async_trait]
impl Tool for ExchangeRateTool {
    fn name(&self) -> &'static str {
        "getExchangeRate"
    }

    fn description(&self) -> &'static str {
        "Get the exchange rate for currencies between countries"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "currency_date": {
                    "type": "string",
                    "description": "A date that must always be in YYYY-MM-DD format or the value 'latest' if a time period is not specified"
                },
                "currency_from": {
                    "type": "string",
                    "description": "The currency to convert from in ISO 4217 format"
                },
                "currency_to": {
                    "type": "string",
                    "description": "The currency to convert to in ISO 4217 format"
                }
            },
            "required": ["currency_from", "currency_date"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<String> {
        let date = string_arg(&args, "currency_date")?;
        if !is_valid_date(date) {
            return Err(Error::Input(format!(
                "currency_date must be YYYY-MM-DD or 'latest', got '{date}'"
            )));
        }

        let mut query = Vec::new();
        if let Some(from) = args["currency_from"].as_str().filter(|v| !v.is_empty()) {
            query.push(("from", from));
        }
        if let Some(to) = args["currency_to"].as_str().filter(|v| !v.is_empty()) {
            query.push(("to", to));
        }

        let url = format!("{}/{date}", self.base_url);
        debug!(%url, ?query, "fetching exchange rate");
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Tool(format!("exchange rate request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!(
                "exchange rate API error ({status}): {body}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Tool(format!("failed to read exchange rate response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_latest_and_iso_dates() {
        assert!(is_valid_date("latest"));
        assert!(is_valid_date("2024-05-01"));
        assert!(!is_valid_date("2024/05/01"));
        assert!(!is_valid_date("yesterday"));
        assert!(!is_valid_date("../admin"));
    }

    #[tokio::test]
    async fn rejects_bad_dates_before_any_request() {
        let tool = ExchangeRateTool::new().with_base_url("http://127.0.0.1:9");
        let context = ToolContext {
            user: "alice".into(),
            provider: "openai".into(),
        };
        let err = tool
            .execute(&context, json!({"currency_date": "soon", "currency_from": "USD"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }
}
