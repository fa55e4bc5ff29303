//! Module `file_ops`
//!
//! Streams single files to clients and writes uploaded bodies to disk.
//! Both directions move one chunk at a time; dropping the stream closes the
//! file handle.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use log::{error, info, warn};
use std::fmt::Display;
use std::io;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, StorageError};
use crate::storage::{DownloadTicket, UploadTarget};

/// Opens a validated file as a chunked byte stream.
pub async fn open_download(ticket: &DownloadTicket) -> Result<ReaderStream<File>, StorageError> {
    let file = File::open(&ticket.file_path)
        .await
        .map_err(|e| StorageError::from_io(e, &ticket.file_name))?;

    info!(
        "Starting download: {} ({} bytes)",
        ticket.file_name, ticket.size
    );
    Ok(ReaderStream::new(file))
}

/// Writes `chunks` into a reserved upload target, enforcing `limit` bytes.
///
/// On any failure the partial file is removed before the error is returned.
pub async fn receive_upload<S, E>(
    target: UploadTarget,
    chunks: S,
    limit: u64,
) -> Result<u64, ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let UploadTarget {
        file,
        file_path,
        stored_name,
    } = target;
    let mut file = File::from_std(file);
    let mut chunks = std::pin::pin!(chunks);
    let mut total_bytes_received = 0u64;

    let result: Result<(), ApiError> = async {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| {
                ApiError::BadRequest(format!("upload body interrupted: {e}"))
            })?;

            // Check size limit BEFORE writing (fail fast)
            total_bytes_received += chunk.len() as u64;
            if total_bytes_received > limit {
                return Err(StorageError::FileTooLarge { limit }.into());
            }

            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            info!(
                "Upload completed: {} ({} bytes)",
                stored_name, total_bytes_received
            );
            Ok(total_bytes_received)
        }
        Err(e) => {
            warn!("Upload of {} aborted: {}", stored_name, e);
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(&file_path).await {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    error!(
                        "Failed to remove partial upload {}: {}",
                        file_path.display(),
                        remove_err
                    );
                }
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use futures_util::stream;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn upload_chunks_land_on_disk() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let target = storage.create_upload("", "notes.txt").unwrap();
        let path = target.file_path.clone();

        let written = receive_upload(target, chunks(&[b"hello ", b"world"]), 1024)
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn oversized_upload_is_removed() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let target = storage.create_upload("", "big.bin").unwrap();
        let path = target.file_path.clone();

        let result = receive_upload(target, chunks(&[b"0123456789", b"0123456789"]), 15).await;

        assert!(matches!(
            result,
            Err(ApiError::Storage(StorageError::FileTooLarge { limit: 15 }))
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn interrupted_body_is_removed() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let target = storage.create_upload("", "cut.bin").unwrap();
        let path = target.file_path.clone();

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let result = receive_upload(target, body, 1024).await;

        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn download_streams_whole_file() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        std::fs::write(storage.root().join("a.txt"), b"0123456789").unwrap();

        let ticket = storage.prepare_download("a.txt").unwrap();
        let stream = open_download(&ticket).await.unwrap();
        let body: Vec<u8> = stream
            .map(|chunk| chunk.unwrap().to_vec())
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(body, b"0123456789");
    }
}
