use std::{fmt, sync::Arc};

use tracing::{error, info, warn};

use crate::{
    config::{Config, OutputFormat},
    error::PipelineError,
    fetcher::fetch_to_path,
    identifier::ContentIdentifier,
    media_api::{AudioVariant, MediaLookupClient},
    selector::select_variant,
    storage::{ScratchFile, Storage, output_file_name, relocate, sanitize_title},
    transcoder::Transcoder,
};

const MP3_EXTENSION: &str = "mp3";
const FALLBACK_EXTENSION: &str = "bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ValidateInput,
    LookupMetadata,
    SelectFormat,
    Fetch,
    Transcode,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidateInput => "validate_input",
            Self::LookupMetadata => "lookup_metadata",
            Self::SelectFormat => "select_format",
            Self::Fetch => "fetch",
            Self::Transcode => "transcode",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub file_name: String,
    pub title: String,
}

impl Conversion {
    pub fn download_url(&self) -> String {
        format!("/download/{}", urlencoding::encode(&self.file_name))
    }
}

pub struct Pipeline {
    http_client: reqwest::Client,
    lookup: MediaLookupClient,
    storage: Storage,
    transcoder: Arc<dyn Transcoder>,
    output_format: OutputFormat,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        http_client: reqwest::Client,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            lookup: MediaLookupClient::new(http_client.clone(), config)?,
            http_client,
            storage: Storage::new(config.download_dir.clone(), config.scratch_dir.clone()),
            transcoder,
            output_format: config.output_format,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // Every failure is logged here with the video id and stage; handlers only map it.
    pub async fn run(&self, url: &str) -> Result<Conversion, PipelineError> {
        let result = self.run_stages(url).await;
        self.storage.sweep_scratch().await;
        result
    }

    async fn run_stages(&self, url: &str) -> Result<Conversion, PipelineError> {
        let id = ContentIdentifier::from_url(url).inspect_err(|error| {
            info!(stage = %Stage::ValidateInput, "Rejected convert request for {url:?}: {error}");
        })?;
        let fail = |stage: Stage| {
            let id = &id;
            move |error: &PipelineError| log_failure(id, stage, error)
        };

        let descriptor = self
            .lookup
            .lookup(&id)
            .await
            .inspect_err(fail(Stage::LookupMetadata))?;

        let title = sanitize_title(descriptor.title.as_deref().unwrap_or("audio"));
        info!(
            "Video {id} titled {title:?} offers {} audio format(s)",
            descriptor.variants.len()
        );
        for variant in &descriptor.variants {
            info!(
                "Audio format: {}, extension: {}, size: {}",
                variant.mime_type,
                variant.extension,
                variant.size_text.as_deref().unwrap_or("unknown")
            );
        }

        let variant = select_variant(&descriptor.variants).inspect_err(fail(Stage::SelectFormat))?;
        let source_extension = source_extension(variant);
        info!(
            "Selected audio format {} ({source_extension}) - {}",
            variant.mime_type,
            variant.size_text.as_deref().unwrap_or("unknown size")
        );
        let fetch_url = variant
            .url
            .as_deref()
            .ok_or_else(|| PipelineError::NoUsableVariant("selected variant has no URL".into()))
            .inspect_err(fail(Stage::SelectFormat))?;

        let scratch = self.storage.scratch_file(&source_extension);
        fetch_to_path(&self.http_client, fetch_url, scratch.path())
            .await
            .inspect_err(fail(Stage::Fetch))?;

        let (file_name, converted) = match self.output_format {
            OutputFormat::Native => (output_file_name(&title, &source_extension), None),
            OutputFormat::Mp3 if source_extension == MP3_EXTENSION => {
                info!("Source for {id} is already MP3; skipping conversion");
                (output_file_name(&title, MP3_EXTENSION), None)
            }
            OutputFormat::Mp3 => {
                let converted = self
                    .convert_to_mp3(&scratch)
                    .await
                    .inspect_err(fail(Stage::Transcode))?;
                (output_file_name(&title, MP3_EXTENSION), Some(converted))
            }
        };

        let finished = converted.as_ref().unwrap_or(&scratch);
        relocate(finished.path(), &self.storage.output_path(&file_name))
            .await
            .inspect_err(fail(Stage::Persist))?;

        info!("Stored {file_name:?} for video {id}");
        Ok(Conversion { file_name, title })
    }

    async fn convert_to_mp3(&self, source: &ScratchFile) -> Result<ScratchFile, PipelineError> {
        let converted = self.storage.scratch_file(MP3_EXTENSION);
        self.transcoder
            .transcode(source.path(), converted.path())
            .await?;

        match tokio::fs::metadata(converted.path()).await {
            Ok(metadata) if metadata.len() > 0 => Ok(converted),
            _ => Err(PipelineError::EmptyOrMissingDownload(
                "transcoder produced no output".to_string(),
            )),
        }
    }
}

fn source_extension(variant: &AudioVariant) -> String {
    let is_safe = |extension: &String| {
        !extension.is_empty()
            && extension.len() <= 10
            && extension.chars().all(|c| c.is_ascii_alphanumeric())
    };

    let declared = variant.extension.trim().trim_start_matches('.').to_ascii_lowercase();
    if is_safe(&declared) {
        return declared;
    }

    variant
        .mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.trim().strip_prefix("audio/"))
        .map(|subtype| match subtype.to_ascii_lowercase().as_str() {
            "mp4" => "m4a".to_string(),
            "mpeg" => MP3_EXTENSION.to_string(),
            other => other.to_string(),
        })
        .filter(is_safe)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

fn log_failure(id: &ContentIdentifier, stage: Stage, error: &PipelineError) {
    match error {
        PipelineError::ConversionFailed {
            reason,
            diagnostics,
        } => error!(
            video_id = %id,
            %stage,
            kind = error.kind(),
            "Conversion failed: {reason}\n{diagnostics}"
        ),
        PipelineError::NoUsableVariant(_) | PipelineError::UpstreamRejected(_) => {
            warn!(video_id = %id, %stage, kind = error.kind(), "{error}")
        }
        _ => error!(video_id = %id, %stage, kind = error.kind(), "{error}"),
    }
}
