use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use url::Url;

use crate::{config::Config, error::PipelineError, identifier::ContentIdentifier};

const DETAILS_PATH: &str = "v2/video/details";
const LOOKUP_TIMEOUT_SECONDS: u64 = 30;
const BODY_EXCERPT_CHARS: usize = 500;
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioVariant {
    pub mime_type: String,
    pub extension: String,
    pub size: u64,
    pub size_text: Option<String>,
    pub url: Option<String>,
}

impl AudioVariant {
    fn from_object(object: &Map<String, Value>) -> Self {
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            mime_type: text("mimeType").unwrap_or_default(),
            extension: text("extension").unwrap_or_default(),
            size: object.get("size").map(parse_size).unwrap_or_default(),
            size_text: text("sizeText"),
            url: text("url").filter(|url| !url.trim().is_empty()),
        }
    }

    pub fn has_fetch_url(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    pub title: Option<String>,
    pub variants: Vec<AudioVariant>,
}

impl MediaDescriptor {
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        let Value::Object(object) = value else {
            return Err(PipelineError::UpstreamMalformed(format!(
                "expected a JSON object, got {}",
                json_type_name(&value)
            )));
        };

        if let Some(upstream_error) = object.get("error") {
            let message = match upstream_error {
                Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            return Err(PipelineError::UpstreamRejected(message));
        }

        Ok(Self {
            title: object.get("title").and_then(Value::as_str).map(str::to_string),
            variants: normalize_variants(object.get("audios")),
        })
    }
}

// `audios` arrives as `{"items": [...]}`, a bare array, or an object keyed by stream id.
pub fn normalize_variants(audios: Option<&Value>) -> Vec<AudioVariant> {
    let entries: Vec<&Value> = match audios {
        Some(Value::Object(object)) => match object.get("items") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(Value::Object(items)) => items.values().collect(),
            Some(_) => Vec::new(),
            None => object.values().collect(),
        },
        Some(Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(Value::as_object)
        .map(AudioVariant::from_object)
        .collect()
}

fn parse_size(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|size| *size > 0.0).map(|size| size as u64))
            .unwrap_or_default(),
        Value::String(text) => text.trim().parse::<u64>().unwrap_or_default(),
        _ => 0,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

pub struct MediaLookupClient {
    http_client: reqwest::Client,
    details_url: Url,
    api_key: String,
    api_host: String,
}

impl MediaLookupClient {
    pub fn new(http_client: reqwest::Client, config: &Config) -> Result<Self, PipelineError> {
        let mut base = config.api_base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let details_url = base
            .join(DETAILS_PATH)
            .map_err(|error| PipelineError::internal("building media API URL", error))?;

        Ok(Self {
            http_client,
            details_url,
            api_key: config.api_key.clone(),
            api_host: config.api_host.clone(),
        })
    }

    pub async fn lookup(&self, id: &ContentIdentifier) -> Result<MediaDescriptor, PipelineError> {
        info!("Requesting media details for video {id}");

        let response = self
            .http_client
            .get(self.details_url.clone())
            .query(&[
                ("videoId", id.as_str()),
                ("urlAccess", "normal"),
                ("videos", "auto"),
                ("audios", "auto"),
            ])
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.api_host)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECONDS))
            .send()
            .await
            .map_err(|error| {
                error!("Media API request for {id} failed: {error}");
                PipelineError::UpstreamUnavailable(error.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            error!("Reading media API response for {id} failed: {error}");
            PipelineError::UpstreamUnavailable(error.to_string())
        })?;
        info!("Media API responded {status} for {id}");

        if !status.is_success() {
            error!("Media API returned {status} for {id}: {}", excerpt(&body));
            return Err(PipelineError::UpstreamUnavailable(format!(
                "media API returned HTTP {status}"
            )));
        }

        let value: Value = serde_json::from_str(&body).map_err(|error| {
            error!("Media API body for {id} is not JSON ({error}): {}", excerpt(&body));
            PipelineError::UpstreamMalformed(format!("response is not JSON: {error}"))
        })?;

        MediaDescriptor::from_value(value).inspect_err(|error| {
            warn!("Media API data for {id} unusable: {error}; body: {}", excerpt(&body));
        })
    }
}
