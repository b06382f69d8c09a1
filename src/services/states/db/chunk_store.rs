use crate::models::info::UploadInfo;
use crate::services::states::db::{ByteStream, FileStream, StoreError, StoreResult, UploadStore};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream;
use sqlx::{Row, SqlitePool};
use std::num::NonZeroU32;
use std::ops::RangeInclusive;
use time::OffsetDateTime;

/// Chunked upload store over two SQLite relations: a `files` table keyed by
/// uid and a `chunks` table keyed by `(files_id, n)`. All chunks of a file
/// except the last have the same size, so range seeks are a single division
/// and concatenation never rewrites data.
pub struct SqliteChunkStore {
    pool: SqlitePool,
    block_size: NonZeroU32,
    max_size: Option<u64>,
}

struct FileRow {
    length: u64,
    chunk_size: Option<u64>,
}

fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn map_unique(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return StoreError::AlreadyExists;
    }
    StoreError::Sqlx(e)
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool, block_size: NonZeroU32, max_size: Option<u64>) -> Self {
        Self {
            pool,
            block_size,
            max_size,
        }
    }

    async fn file_row(&self, uid: &str) -> StoreResult<FileRow> {
        let row = sqlx::query("SELECT length, chunk_size FROM files WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        let length: i64 = row.try_get("length")?;
        let chunk_size: Option<i64> = row.try_get("chunk_size")?;
        Ok(FileRow {
            length: length as u64,
            chunk_size: chunk_size.map(|c| c as u64),
        })
    }

    /// Persists one block and advances the file accounting in a single
    /// transaction, so `files.length` always equals the sum of chunk sizes.
    async fn append_chunk(&self, uid: &str, n: u64, data: &[u8], chunk_size: u64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO chunks (files_id, n, data) VALUES (?, ?, ?)")
            .bind(uid)
            .bind(n as i64)
            .bind(data)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE files SET length = length + ?, chunk_size = COALESCE(chunk_size, ?), \
             upload_date = ? WHERE uid = ?",
        )
        .bind(data.len() as i64)
        .bind(chunk_size as i64)
        .bind(now_ts())
        .bind(uid)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UploadStore for SqliteChunkStore {
    async fn create_file(&self, uid: &str, info: &UploadInfo) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO files (uid, length, chunk_size, upload_date, content_type, metadata) \
             VALUES (?, 0, NULL, ?, ?, ?)",
        )
        .bind(uid)
        .bind(now_ts())
        .bind(info.content_type())
        .bind(info.to_json()?)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;
        Ok(())
    }

    async fn patch_file(
        &self,
        uid: &str,
        mut input: ByteStream,
        info: &UploadInfo,
    ) -> StoreResult<u64> {
        let row = self.file_row(uid).await?;
        let offset = row.length;
        let declared = info.length();
        let ceiling = match (self.max_size, declared) {
            (Some(max), Some(len)) => Some(max.min(len)),
            (Some(max), None) => Some(max),
            (None, len) => len,
        };
        let default_block = u64::from(self.block_size.get());
        let mut chunk_size = row.chunk_size;
        let mut next_n = match chunk_size {
            Some(cs) => offset.div_ceil(cs),
            None => 0,
        };
        let mut buf = BytesMut::new();
        let mut written: u64 = 0;
        let mut read: u64 = 0;

        while let Some(item) = input.next().await {
            let data = item?;
            read += data.len() as u64;
            if let Some(limit) = ceiling
                && offset + written + buf.len() as u64 + data.len() as u64 > limit
            {
                return Err(StoreError::MaxSizeExceeded { limit, read });
            }
            buf.extend_from_slice(&data);
            // The first block read fixes the upload's permanent chunk size.
            if chunk_size.is_none() && buf.len() as u64 >= default_block {
                chunk_size = Some(default_block);
            }
            if let Some(cs) = chunk_size {
                while buf.len() as u64 >= cs {
                    let block = buf.split_to(cs as usize).freeze();
                    self.append_chunk(uid, next_n, &block, cs).await?;
                    next_n += 1;
                    written += block.len() as u64;
                }
            }
        }

        match chunk_size {
            None => {
                if buf.is_empty() {
                    return Ok(0);
                }
                // First write smaller than the configured block: its length
                // becomes the chunk size.
                let cs = buf.len() as u64;
                let block = buf.split_to(buf.len()).freeze();
                self.append_chunk(uid, next_n, &block, cs).await?;
                written += block.len() as u64;
            }
            Some(cs) if !buf.is_empty() => {
                let terminal =
                    matches!(declared, Some(len) if offset + written + buf.len() as u64 == len);
                if !terminal {
                    return Err(StoreError::UnevenChunks {
                        expected: cs,
                        got: buf.len() as u64,
                    });
                }
                let block = buf.split_to(buf.len()).freeze();
                self.append_chunk(uid, next_n, &block, cs).await?;
                written += block.len() as u64;
            }
            Some(_) => {}
        }
        Ok(written)
    }

    async fn get_file(
        &self,
        uid: &str,
        range: Option<RangeInclusive<u64>>,
    ) -> StoreResult<FileStream> {
        let row = self.file_row(uid).await?;
        let len = row.length;
        if len == 0 {
            return Ok(FileStream {
                length: 0,
                stream: stream::empty().boxed(),
            });
        }
        let (start, end) = match range {
            Some(r) => (*r.start(), (*r.end()).min(len - 1)),
            None => (0, len - 1),
        };
        if start > end || start >= len {
            return Ok(FileStream {
                length: 0,
                stream: stream::empty().boxed(),
            });
        }
        let cs = row
            .chunk_size
            .ok_or_else(|| StoreError::Inconsistent(format!("upload {uid} has no chunk size")))?;
        let first = start / cs;
        let last = end / cs;
        let pool = self.pool.clone();
        let uid = uid.to_owned();
        let stream = stream::try_unfold(first, move |n| {
            let pool = pool.clone();
            let uid = uid.clone();
            async move {
                if n > last {
                    return Ok(None);
                }
                let data: Option<Vec<u8>> =
                    sqlx::query_scalar("SELECT data FROM chunks WHERE files_id = ? AND n = ?")
                        .bind(&uid)
                        .bind(n as i64)
                        .fetch_optional(&pool)
                        .await?;
                let Some(data) = data else {
                    return Err(StoreError::Inconsistent(format!(
                        "upload {uid} is missing chunk {n}"
                    )));
                };
                let buf = Bytes::from(data);
                let chunk_start = n * cs;
                let lo = start.saturating_sub(chunk_start) as usize;
                let hi = if end - chunk_start + 1 < buf.len() as u64 {
                    (end - chunk_start + 1) as usize
                } else {
                    buf.len()
                };
                Ok(Some((buf.slice(lo..hi), n + 1)))
            }
        })
        .boxed();
        Ok(FileStream {
            length: end - start + 1,
            stream,
        })
    }

    async fn delete_file(&self, uid: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE files_id = ?")
            .bind(uid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE uid = ?")
            .bind(uid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_info(&self, uid: &str) -> StoreResult<UploadInfo> {
        let raw: Option<String> = sqlx::query_scalar("SELECT metadata FROM files WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        let raw = raw.ok_or(StoreError::NotFound)?;
        Ok(UploadInfo::from_json(&raw)?)
    }

    async fn update_info(&self, uid: &str, info: &UploadInfo) -> StoreResult<()> {
        let res = sqlx::query("UPDATE files SET metadata = ? WHERE uid = ?")
            .bind(info.to_json()?)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn concatenate(
        &self,
        uid: &str,
        parts: &[String],
        info: &UploadInfo,
    ) -> StoreResult<u64> {
        struct PartRow {
            uid: String,
            length: u64,
            chunk_size: Option<u64>,
        }

        let mut tx = self.pool.begin().await?;
        let mut metas = Vec::with_capacity(parts.len());
        for part in parts {
            let row = sqlx::query("SELECT length, chunk_size FROM files WHERE uid = ?")
                .bind(part)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound)?;
            let length: i64 = row.try_get("length")?;
            let chunk_size: Option<i64> = row.try_get("chunk_size")?;
            metas.push(PartRow {
                uid: part.clone(),
                length: length as u64,
                chunk_size: chunk_size.map(|c| c as u64),
            });
        }

        // Chunk sizes must agree across parts; only the terminal part may
        // carry a short last chunk, otherwise the final file would hold a
        // short chunk in the middle.
        let common = metas
            .iter()
            .find(|m| m.length > 0)
            .and_then(|m| m.chunk_size);
        if let Some(common) = common {
            let last_idx = metas.len() - 1;
            for (i, m) in metas.iter().enumerate() {
                if m.length == 0 {
                    continue;
                }
                let cs = m.chunk_size.ok_or_else(|| {
                    StoreError::Inconsistent(format!("upload {} has no chunk size", m.uid))
                })?;
                if i < last_idx {
                    if cs != common {
                        return Err(StoreError::UnevenChunks {
                            expected: common,
                            got: cs,
                        });
                    }
                    if m.length % cs != 0 {
                        return Err(StoreError::UnevenChunks {
                            expected: common,
                            got: m.length % cs,
                        });
                    }
                } else {
                    let chunks = m.length.div_ceil(cs);
                    if chunks > 1 && cs != common {
                        return Err(StoreError::UnevenChunks {
                            expected: common,
                            got: cs,
                        });
                    }
                    if chunks == 1 && m.length > common {
                        return Err(StoreError::UnevenChunks {
                            expected: common,
                            got: m.length,
                        });
                    }
                }
            }
        }

        let total: u64 = metas.iter().map(|m| m.length).sum();
        sqlx::query(
            "INSERT INTO files (uid, length, chunk_size, upload_date, content_type, metadata) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uid)
        .bind(total as i64)
        .bind(common.map(|c| c as i64))
        .bind(now_ts())
        .bind(info.content_type())
        .bind(info.to_json()?)
        .execute(&mut *tx)
        .await
        .map_err(map_unique)?;

        let mut base: i64 = 0;
        for m in &metas {
            sqlx::query("UPDATE chunks SET files_id = ?, n = n + ? WHERE files_id = ?")
                .bind(uid)
                .bind(base)
                .bind(&m.uid)
                .execute(&mut *tx)
                .await?;
            if let Some(cs) = m.chunk_size
                && m.length > 0
            {
                base += m.length.div_ceil(cs) as i64;
            }
            sqlx::query("DELETE FROM files WHERE uid = ?")
                .bind(&m.uid)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(total)
    }

    async fn expire_files(&self, before: OffsetDateTime) -> StoreResult<u64> {
        let cutoff = before.unix_timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE files_id IN (SELECT uid FROM files WHERE upload_date <= ?)")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM files WHERE upload_date <= ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn mem_store(block: u32, max: Option<u64>) -> SqliteChunkStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteChunkStore::new(pool, NonZeroU32::new(block).unwrap(), max)
    }

    fn one_shot(data: &[u8]) -> ByteStream {
        stream::iter(vec![Ok(Bytes::copy_from_slice(data))]).boxed()
    }

    fn info_with_length(len: u64) -> UploadInfo {
        let mut info = UploadInfo::new();
        info.set_length(len);
        info
    }

    async fn read_all(fs: FileStream) -> Vec<u8> {
        fs.stream
            .try_collect::<Vec<Bytes>>()
            .await
            .unwrap()
            .concat()
    }

    async fn chunk_sizes(store: &SqliteChunkStore, uid: &str) -> Vec<i64> {
        sqlx::query_scalar("SELECT length(data) FROM chunks WHERE files_id = ? ORDER BY n")
            .bind(uid)
            .fetch_all(&store.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn patch_splits_into_uniform_chunks() {
        let store = mem_store(4, None).await;
        let info = info_with_length(10);
        store.create_file("u1", &info).await.unwrap();
        let written = store
            .patch_file("u1", one_shot(b"0123456789"), &info)
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(chunk_sizes(&store, "u1").await, vec![4, 4, 2]);
        let fs = store.get_file("u1", None).await.unwrap();
        assert_eq!(fs.length, 10);
        assert_eq!(read_all(fs).await, b"0123456789");
    }

    #[tokio::test]
    async fn first_short_write_fixes_chunk_size() {
        let store = mem_store(1024, None).await;
        let info = info_with_length(6);
        store.create_file("u1", &info).await.unwrap();
        store.patch_file("u1", one_shot(b"hel"), &info).await.unwrap();
        store.patch_file("u1", one_shot(b"lo!"), &info).await.unwrap();
        assert_eq!(chunk_sizes(&store, "u1").await, vec![3, 3]);
        assert_eq!(read_all(store.get_file("u1", None).await.unwrap()).await, b"hello!");
    }

    #[tokio::test]
    async fn short_block_mid_upload_is_rejected() {
        let store = mem_store(1024, None).await;
        let info = info_with_length(10);
        store.create_file("u1", &info).await.unwrap();
        store.patch_file("u1", one_shot(b"hel"), &info).await.unwrap();
        let err = store
            .patch_file("u1", one_shot(b"wo"), &info)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnevenChunks { expected: 3, got: 2 }));
        // the rejected write left the aligned prefix untouched
        assert_eq!(chunk_sizes(&store, "u1").await, vec![3]);
    }

    #[tokio::test]
    async fn short_terminal_block_is_accepted() {
        let store = mem_store(1024, None).await;
        let info = info_with_length(5);
        store.create_file("u1", &info).await.unwrap();
        store.patch_file("u1", one_shot(b"hel"), &info).await.unwrap();
        let written = store.patch_file("u1", one_shot(b"lo"), &info).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(chunk_sizes(&store, "u1").await, vec![3, 2]);
    }

    #[tokio::test]
    async fn max_size_is_enforced() {
        let store = mem_store(4, Some(8)).await;
        let info = UploadInfo::new();
        store.create_file("u1", &info).await.unwrap();
        let err = store
            .patch_file("u1", one_shot(b"0123456789"), &info)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MaxSizeExceeded { limit: 8, .. }));
    }

    #[tokio::test]
    async fn create_collision_is_reported() {
        let store = mem_store(4, None).await;
        let info = UploadInfo::new();
        store.create_file("u1", &info).await.unwrap();
        let err = store.create_file("u1", &info).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn range_reads_cross_chunk_boundaries() {
        let store = mem_store(3, None).await;
        let info = info_with_length(11);
        store.create_file("u1", &info).await.unwrap();
        store
            .patch_file("u1", one_shot(b"hello world"), &info)
            .await
            .unwrap();
        let fs = store.get_file("u1", Some(6..=10)).await.unwrap();
        assert_eq!(fs.length, 5);
        assert_eq!(read_all(fs).await, b"world");
        let fs = store.get_file("u1", Some(2..=4)).await.unwrap();
        assert_eq!(read_all(fs).await, b"llo");
        let fs = store.get_file("u1", Some(4..=4)).await.unwrap();
        assert_eq!(read_all(fs).await, b"o");
    }

    #[tokio::test]
    async fn concatenate_preserves_byte_order_and_consumes_parts() {
        let store = mem_store(1024, None).await;
        for (uid, data, len) in [
            ("a", b"hel".as_slice(), 3u64),
            ("b", b"lo ", 3),
            ("c", b"wor", 3),
            ("d", b"ld", 2),
        ] {
            let info = info_with_length(len);
            store.create_file(uid, &info).await.unwrap();
            store.patch_file(uid, one_shot(data), &info).await.unwrap();
        }
        let parts: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let total = store
            .concatenate("fin", &parts, &UploadInfo::new())
            .await
            .unwrap();
        assert_eq!(total, 11);
        assert_eq!(read_all(store.get_file("fin", None).await.unwrap()).await, b"hello world");
        for part in &parts {
            assert!(matches!(
                store.read_info(part).await.unwrap_err(),
                StoreError::NotFound
            ));
        }
    }

    #[tokio::test]
    async fn concatenate_rejects_interior_short_part() {
        let store = mem_store(1024, None).await;
        for (uid, data, len) in [("a", b"hel".as_slice(), 3u64), ("b", b"lo", 2), ("c", b"wor", 3)] {
            let info = info_with_length(len);
            store.create_file(uid, &info).await.unwrap();
            store.patch_file(uid, one_shot(data), &info).await.unwrap();
        }
        let parts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let err = store
            .concatenate("fin", &parts, &UploadInfo::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnevenChunks { .. }));
        // nothing was consumed
        assert!(store.read_info("a").await.is_ok());
    }

    #[tokio::test]
    async fn concatenate_missing_part_fails() {
        let store = mem_store(1024, None).await;
        let err = store
            .concatenate("fin", &["ghost".to_string()], &UploadInfo::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = mem_store(4, None).await;
        let info = info_with_length(3);
        store.create_file("u1", &info).await.unwrap();
        store.patch_file("u1", one_shot(b"abc"), &info).await.unwrap();
        store.delete_file("u1").await.unwrap();
        store.delete_file("u1").await.unwrap();
        assert!(matches!(
            store.read_info("u1").await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn expiration_cascades_and_spares_fresh_uploads() {
        let store = mem_store(4, None).await;
        for uid in ["fresh", "old", "older"] {
            let info = info_with_length(3);
            store.create_file(uid, &info).await.unwrap();
            store.patch_file(uid, one_shot(b"abc"), &info).await.unwrap();
        }
        let t = OffsetDateTime::now_utc();
        for (uid, age) in [("fresh", 0i64), ("old", 1), ("older", 2)] {
            sqlx::query("UPDATE files SET upload_date = ? WHERE uid = ?")
                .bind(t.unix_timestamp() - age)
                .bind(uid)
                .execute(&store.pool)
                .await
                .unwrap();
        }
        let reclaimed = store
            .expire_files(t - time::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reclaimed, 2);
        assert!(store.read_info("fresh").await.is_ok());
        assert!(store.read_info("old").await.is_err());
        assert!(store.read_info("older").await.is_err());
        // the survivor keeps its chunks and their association
        assert_eq!(read_all(store.get_file("fresh", None).await.unwrap()).await, b"abc");
        let orphans: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE files_id NOT IN (SELECT uid FROM files)",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn get_file_of_unknown_uid_fails() {
        let store = mem_store(4, None).await;
        assert!(matches!(
            store.get_file("ghost", None).await.unwrap_err(),
            StoreError::NotFound
        ));
    }
}
