// ABOUTME: Streams one local file into one object through the multipart upload protocol
// ABOUTME: Reads fixed-size chunks, uploads them in order, and aborts the upload on any failure

use super::{PartRecord, PartUploader, StoreError, UploadSession};
use crate::utils;
use bytes::Bytes;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub bytes_transferred: u64,
    /// Number of multipart parts; 0 when an empty file was stored as a whole object
    pub part_count: u32,
    /// Hex SHA-256 of the bytes sent
    pub sha256: String,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot open {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transfer of '{key}' failed: {cause}")]
    TransferFailed {
        key: String,
        #[source]
        cause: StoreError,
    },

    #[error("reading source for '{key}' failed: {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Whether the store rejected our credentials, which no other object will get past either
    pub fn is_auth(&self) -> bool {
        matches!(self, TransferError::TransferFailed { cause, .. } if cause.is_auth())
    }
}

/// Turns local files into objects using a [`PartUploader`]
///
/// Parts are uploaded one at a time, so at most one chunk is held in memory.
pub struct ObjectTransferEngine<'a> {
    uploader: &'a dyn PartUploader,
    chunk_size: usize,
    show_progress: bool,
}

impl<'a> ObjectTransferEngine<'a> {
    pub fn new(uploader: &'a dyn PartUploader, chunk_size: usize) -> Self {
        Self {
            uploader,
            chunk_size: chunk_size.max(1),
            show_progress: false,
        }
    }

    /// Draw a byte progress bar on stderr while transferring
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Upload the file at `local_path` as `object_key`
    pub async fn transfer(
        &self,
        local_path: &Path,
        object_key: &str,
    ) -> Result<TransferResult, TransferError> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|source| TransferError::SourceUnreadable {
                path: local_path.to_path_buf(),
                source,
            })?;
        let total_len = file.metadata().await.map(|m| m.len()).ok();

        tracing::info!(
            "Transferring {} to '{}' in chunks of {}",
            local_path.display(),
            object_key,
            utils::format_bytes(self.chunk_size as u64)
        );

        let progress = self.progress_bar(total_len);
        let result = self.transfer_from(file, object_key, &progress).await;
        progress.finish_and_clear();
        result
    }

    /// Upload everything `reader` yields as `object_key`
    pub async fn transfer_reader<R>(
        &self,
        reader: R,
        object_key: &str,
    ) -> Result<TransferResult, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.transfer_from(reader, object_key, &ProgressBar::hidden())
            .await
    }

    async fn transfer_from<R>(
        &self,
        mut reader: R,
        object_key: &str,
        progress: &ProgressBar,
    ) -> Result<TransferResult, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut hasher = Sha256::new();

        let first = read_chunk(&mut reader, self.chunk_size)
            .await
            .map_err(|source| TransferError::ReadFailed {
                key: object_key.to_string(),
                source,
            })?;

        if first.is_empty() {
            // An empty source has no parts; store an empty object directly
            self.uploader
                .put_object(object_key, Bytes::new())
                .await
                .map_err(|cause| TransferError::TransferFailed {
                    key: object_key.to_string(),
                    cause,
                })?;
            tracing::info!("✓ Stored empty object '{}'", object_key);
            return Ok(TransferResult {
                bytes_transferred: 0,
                part_count: 0,
                sha256: format!("{:x}", hasher.finalize()),
            });
        }

        let session = self
            .uploader
            .initiate(object_key)
            .await
            .map_err(|cause| TransferError::TransferFailed {
                key: object_key.to_string(),
                cause,
            })?;

        match self
            .upload_parts(&session, first, &mut reader, &mut hasher, progress)
            .await
        {
            Ok((bytes_transferred, parts)) => {
                if let Err(cause) = self.uploader.complete(&session, &parts).await {
                    self.uploader.abort(&session).await;
                    return Err(TransferError::TransferFailed {
                        key: object_key.to_string(),
                        cause,
                    });
                }

                tracing::info!(
                    "✓ Uploaded '{}': {} bytes in {} part(s)",
                    object_key,
                    bytes_transferred,
                    parts.len()
                );
                Ok(TransferResult {
                    bytes_transferred,
                    part_count: parts.len() as u32,
                    sha256: format!("{:x}", hasher.finalize()),
                })
            }
            Err(e) => {
                self.uploader.abort(&session).await;
                Err(e)
            }
        }
    }

    async fn upload_parts<R>(
        &self,
        session: &UploadSession,
        first: Vec<u8>,
        reader: &mut R,
        hasher: &mut Sha256,
        progress: &ProgressBar,
    ) -> Result<(u64, Vec<PartRecord>), TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut parts = Vec::new();
        let mut bytes_transferred = 0u64;
        let mut chunk = first;
        let mut part_number = 1u32;

        while !chunk.is_empty() {
            let len = chunk.len();
            hasher.update(&chunk);
            tracing::debug!(
                "Uploading part {} of '{}' ({} bytes)",
                part_number,
                session.object_key(),
                len
            );

            let record = self
                .uploader
                .upload_part(session, part_number, Bytes::from(chunk))
                .await
                .map_err(|cause| TransferError::TransferFailed {
                    key: session.object_key().to_string(),
                    cause,
                })?;
            parts.push(record);
            bytes_transferred += len as u64;
            progress.inc(len as u64);
            part_number += 1;

            chunk = read_chunk(reader, self.chunk_size).await.map_err(|source| {
                TransferError::ReadFailed {
                    key: session.object_key().to_string(),
                    source,
                }
            })?;
        }

        Ok((bytes_transferred, parts))
    }

    fn progress_bar(&self, total_len: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total_len.unwrap_or(0));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

/// Read until `chunk_size` bytes are buffered or the reader is exhausted
///
/// Short reads from the underlying source are coalesced so that only the
/// final chunk of a file can be smaller than `chunk_size`.
async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut chunk = Vec::with_capacity(chunk_size);
    (&mut *reader)
        .take(chunk_size as u64)
        .read_to_end(&mut chunk)
        .await?;
    Ok(chunk)
}
