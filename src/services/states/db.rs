pub mod chunk_store;

use crate::models::info::UploadInfo;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::ops::RangeInclusive;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upload not found")]
    NotFound,
    #[error("upload id already exists")]
    AlreadyExists,
    #[error("chunk of {got} bytes breaks the {expected}-byte chunk layout")]
    UnevenChunks { expected: u64, got: u64 },
    #[error("upload exceeds the {limit} byte limit after reading {read} bytes")]
    MaxSizeExceeded { limit: u64, read: u64 },
    #[error("inconsistent stored state: {0}")]
    Inconsistent(String),
    #[error("malformed upload info: {0}")]
    InvalidInfo(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Request body bytes on their way into the store.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A lazy download body plus the exact number of bytes it will yield.
pub struct FileStream {
    pub length: u64,
    pub stream: BoxStream<'static, StoreResult<Bytes>>,
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Storage capability contract for upload persistence. The shipped backend is
/// [`chunk_store::SqliteChunkStore`]; alternatives only need to honor the
/// uniform-chunk-size invariant that makes concatenation a metadata update.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Inserts an empty files row for `uid`. Fails with
    /// [`StoreError::AlreadyExists`] when the id collides.
    async fn create_file(&self, uid: &str, info: &UploadInfo) -> StoreResult<()>;

    /// Appends the stream to the upload and returns the bytes written. The
    /// first write fixes the upload's permanent chunk size; later writes must
    /// arrive in whole multiples of it unless they end the upload.
    async fn patch_file(&self, uid: &str, input: ByteStream, info: &UploadInfo)
    -> StoreResult<u64>;

    /// Streams `range` (whole file when absent) in ascending chunk order.
    async fn get_file(&self, uid: &str, range: Option<RangeInclusive<u64>>)
    -> StoreResult<FileStream>;

    /// Removes the files row and all chunks. Missing uid is a no-op.
    async fn delete_file(&self, uid: &str) -> StoreResult<()>;

    async fn read_info(&self, uid: &str) -> StoreResult<UploadInfo>;

    /// Replaces the stored info blob wholesale.
    async fn update_info(&self, uid: &str, info: &UploadInfo) -> StoreResult<()>;

    /// Builds `uid` out of the re-parented chunks of `parts`, in order,
    /// deleting the parts. Returns the summed length.
    async fn concatenate(&self, uid: &str, parts: &[String], info: &UploadInfo)
    -> StoreResult<u64>;

    /// Bulk-deletes uploads last touched at or before `before`, cascading to
    /// their chunks. Returns the number of uploads reclaimed.
    async fn expire_files(&self, before: OffsetDateTime) -> StoreResult<u64>;

    /// Invoked once when an upload transitions to finished.
    async fn finalize_file(&self, _uid: &str, _info: &UploadInfo) -> StoreResult<()> {
        Ok(())
    }
}
