//! Streaming media fetches.
//!
//! Response bodies are streamed straight into a `.part` file through a
//! buffer of the configured chunk size, so memory use does not depend on the
//! size of the media. The finished file is renamed into place; a failed
//! transfer removes its partial file.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::filename::{extension_from_content_type, extension_from_url, partial_path};
use crate::error::RequestError;
use crate::session::{HeaderKind, Session};

/// A media file that reached disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// Final file path.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
}

/// Fetches `url` into `dir/{stem}{ext}`.
///
/// `extension` (leading dot included) overrides the one derived from the URL
/// path or the response `Content-Type`.
///
/// # Errors
///
/// Returns [`RequestError`] on transport failure, a non-2xx status, or a
/// disk write failure.
pub(crate) async fn fetch_to_file(
    session: &Session,
    url: &str,
    kind: HeaderKind,
    dir: &Path,
    stem: &str,
    chunk: usize,
    extension: Option<&str>,
) -> Result<FetchedFile, RequestError> {
    let response = session.send(url, kind).await?;

    let extension = extension.map(str::to_string).or_else(|| extension_from_url(url));
    let extension = extension.unwrap_or_else(|| {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(".bin", extension_from_content_type)
            .to_string()
    });
    let target = dir.join(format!("{stem}{extension}"));
    let partial = partial_path(&target);
    debug!(url, path = %target.display(), "streaming media");

    let mut file = File::create(&partial)
        .await
        .map_err(|e| RequestError::io(partial.clone(), e))?;

    let bytes = match stream_to_file(&mut file, response, url, &partial, chunk).await {
        Ok(bytes) => bytes,
        Err(e) => {
            drop(file);
            debug!(path = %partial.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };
    drop(file);

    tokio::fs::rename(&partial, &target)
        .await
        .map_err(|e| RequestError::io(target.clone(), e))?;

    info!(url, path = %target.display(), bytes, "media saved");
    Ok(FetchedFile {
        path: target,
        bytes,
    })
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    chunk: usize,
) -> Result<u64, RequestError> {
    let mut writer = BufWriter::with_capacity(chunk, file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| RequestError::from_reqwest(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| RequestError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| RequestError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}
