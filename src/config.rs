use std::path::PathBuf;

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_HOST: &str = "youtube-media-downloader.p.rapidapi.com";
pub const DEFAULT_API_BASE_URL: &str = "https://youtube-media-downloader.p.rapidapi.com";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RAPIDAPI_KEY environment variable not set")]
    MissingApiKey,
    #[error("could not determine a download directory; set DOWNLOAD_DIR")]
    MissingDownloadDir,
    #[error("invalid MEDIA_API_BASE_URL {value:?}: {reason}")]
    InvalidBaseUrl { value: String, reason: String },
    #[error("invalid OUTPUT_FORMAT {0:?}; expected \"mp3\" or \"native\"")]
    InvalidOutputFormat(String),
    #[error("invalid origin in ALLOWED_ORIGINS: {0}. Use values like https://example.com")]
    InvalidOrigin(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp3,
    Native,
}

impl OutputFormat {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "mp3" => Ok(Self::Mp3),
            "native" => Ok(Self::Native),
            _ => Err(ConfigError::InvalidOutputFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_host: String,
    pub api_base_url: Url,
    pub download_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub output_format: OutputFormat,
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).and_then(|value| non_empty(&value));

        let api_key = var("RAPIDAPI_KEY").ok_or(ConfigError::MissingApiKey)?;
        let api_host = var("RAPIDAPI_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string());

        let base_url = var("MEDIA_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = Url::parse(&base_url).map_err(|error| ConfigError::InvalidBaseUrl {
            value: base_url.clone(),
            reason: error.to_string(),
        })?;

        let download_dir = var("DOWNLOAD_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                var("HOME")
                    .or_else(|| var("USERPROFILE"))
                    .map(|home| PathBuf::from(home).join("Downloads"))
            })
            .ok_or(ConfigError::MissingDownloadDir)?;

        let scratch_dir = var("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let output_format = match var("OUTPUT_FORMAT") {
            Some(value) => OutputFormat::parse(&value)?,
            None => OutputFormat::Mp3,
        };

        let bind_addr = var("APP_ADDR")
            .or_else(|| {
                var("PORT")
                    .and_then(|value| value.parse::<u16>().ok())
                    .map(|port| format!("0.0.0.0:{port}"))
            })
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(|origin| {
                        normalize_origin(origin)
                            .ok_or_else(|| ConfigError::InvalidOrigin(origin.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            api_key,
            api_host,
            api_base_url,
            download_dir,
            scratch_dir,
            output_format,
            bind_addr,
            allowed_origins,
        })
    }
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
