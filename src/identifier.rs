use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::error::PipelineError;

static VIDEO_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:v=|/|youtu\.be/)([0-9A-Za-z_-]{11})").expect("video id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentifier(String);

impl ContentIdentifier {
    pub fn from_url(url: &str) -> Result<Self, PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PipelineError::InvalidInput("No URL provided".to_string()));
        }

        VIDEO_ID_PATTERN
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| Self(id.as_str().to_string()))
            .ok_or_else(|| PipelineError::InvalidInput("Invalid YouTube URL".to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_known_url_shapes() {
        let cases = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ?start=10",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "  https://youtu.be/dQw4w9WgXcQ  ",
        ];
        for url in cases {
            let id = ContentIdentifier::from_url(url).unwrap();
            assert_eq!(id.as_str(), "dQw4w9WgXcQ", "url: {url}");
        }
    }

    #[test]
    fn rejects_urls_without_an_id() {
        for url in ["https://example.com", "https://youtu.be/short", "not a url"] {
            let error = ContentIdentifier::from_url(url).unwrap_err();
            assert!(matches!(error, PipelineError::InvalidInput(_)), "url: {url}");
        }
    }

    #[test]
    fn rejects_blank_input() {
        let error = ContentIdentifier::from_url("   ").unwrap_err();
        assert!(matches!(error, PipelineError::InvalidInput(message) if message == "No URL provided"));
    }
}
