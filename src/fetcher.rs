use std::{io::ErrorKind, path::Path, time::Duration};

use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{error, info, warn};

use crate::error::PipelineError;

const FETCH_TIMEOUT_SECONDS: u64 = 10 * 60;

pub async fn fetch_to_path(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
) -> Result<u64, PipelineError> {
    if let Err(error) = stream_into(client, url, destination).await {
        remove_partial(destination).await;
        return Err(error);
    }

    let size = match tokio::fs::metadata(destination).await {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            error!("Fetched file missing at {destination:?}: {error}");
            return Err(PipelineError::EmptyOrMissingDownload(format!(
                "{destination:?} does not exist"
            )));
        }
    };

    if size == 0 {
        error!("Fetched file is empty: {destination:?}");
        remove_partial(destination).await;
        return Err(PipelineError::EmptyOrMissingDownload(format!(
            "{destination:?} is empty"
        )));
    }

    info!("Fetched {size} bytes into {destination:?}");
    Ok(size)
}

async fn stream_into(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
) -> Result<(), PipelineError> {
    let unavailable = |error: reqwest::Error| {
        error!("Audio fetch failed: {error}");
        PipelineError::UpstreamUnavailable(error.to_string())
    };

    let mut response = client
        .get(url)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(unavailable)?;

    let mut file = File::create(destination)
        .await
        .map_err(|error| PipelineError::internal("creating download file", error))?;

    while let Some(chunk) = response.chunk().await.map_err(unavailable)? {
        file.write_all(&chunk)
            .await
            .map_err(|error| PipelineError::internal("writing download file", error))?;
    }

    file.flush()
        .await
        .map_err(|error| PipelineError::internal("flushing download file", error))
}

async fn remove_partial(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != ErrorKind::NotFound
    {
        warn!("Could not remove partial download {path:?}: {error}");
    }
}
