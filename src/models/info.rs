use crate::models::const_val::{
    H_UPLOAD_CONCAT, H_UPLOAD_DEFER_LENGTH, H_UPLOAD_EXPIRES, H_UPLOAD_LENGTH, H_UPLOAD_METADATA,
    H_UPLOAD_OFFSET,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc2822;
use time::{Duration, OffsetDateTime};

#[derive(Debug, thiserror::Error)]
pub enum InfoError {
    #[error("invalid Upload-Metadata pair {0:?}")]
    Metadata(String),
    #[error("invalid Upload-Concat value {0:?}")]
    Concat(String),
}

/// Parsed form of the `Upload-Concat` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatKind {
    Partial,
    Final { parts: Vec<String> },
}

impl ConcatKind {
    pub fn parse(raw: &str) -> Result<Self, InfoError> {
        if raw == "partial" {
            return Ok(ConcatKind::Partial);
        }
        let Some(rest) = raw.strip_prefix("final;") else {
            return Err(InfoError::Concat(raw.to_owned()));
        };
        let mut parts = Vec::new();
        for url in rest.split_whitespace() {
            let uid = part_uid_from_url(url).ok_or_else(|| InfoError::Concat(raw.to_owned()))?;
            parts.push(uid);
        }
        if parts.is_empty() {
            return Err(InfoError::Concat(raw.to_owned()));
        }
        Ok(ConcatKind::Final { parts })
    }
}

/// Last non-empty path segment of a referenced partial upload URL.
pub fn part_uid_from_url(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Typed view over the per-upload metadata dictionary. Keys are the verbatim
/// tus header names; the whole map round-trips through JSON into the files
/// table, so everything not understood here is carried along untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadInfo {
    map: BTreeMap<String, String>,
}

impl UploadInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn insert_raw(&mut self, key: &str, value: impl Into<String>) {
        self.map.insert(key.to_owned(), value.into());
    }

    pub fn length(&self) -> Option<u64> {
        self.get(H_UPLOAD_LENGTH).and_then(|v| v.parse().ok())
    }

    pub fn set_length(&mut self, length: u64) {
        self.insert_raw(H_UPLOAD_LENGTH, length.to_string());
    }

    pub fn offset(&self) -> u64 {
        self.get(H_UPLOAD_OFFSET)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.insert_raw(H_UPLOAD_OFFSET, offset.to_string());
    }

    pub fn defer_length(&self) -> bool {
        self.get(H_UPLOAD_DEFER_LENGTH) == Some("1")
    }

    pub fn set_defer_length(&mut self) {
        self.insert_raw(H_UPLOAD_DEFER_LENGTH, "1");
    }

    pub fn clear_defer_length(&mut self) {
        self.map.remove(H_UPLOAD_DEFER_LENGTH);
    }

    /// Strictly parsed `Upload-Concat` value, used when validating creation
    /// requests. [`Self::is_partial`]/[`Self::is_final`] are the lossy forms
    /// for values that were already accepted at creation time.
    pub fn concat(&self) -> Result<Option<ConcatKind>, InfoError> {
        self.get(H_UPLOAD_CONCAT).map(ConcatKind::parse).transpose()
    }

    pub fn is_partial(&self) -> bool {
        self.get(H_UPLOAD_CONCAT) == Some("partial")
    }

    pub fn is_final(&self) -> bool {
        self.get(H_UPLOAD_CONCAT)
            .is_some_and(|v| v.starts_with("final"))
    }

    pub fn metadata(&self) -> Result<BTreeMap<String, Vec<u8>>, InfoError> {
        parse_metadata(self.get(H_UPLOAD_METADATA).unwrap_or(""))
    }

    pub fn metadata_utf8(&self, key: &str) -> Option<String> {
        let mut parsed = self.metadata().ok()?;
        parsed.remove(key).and_then(|v| String::from_utf8(v).ok())
    }

    pub fn content_type(&self) -> Option<String> {
        self.metadata_utf8("content_type")
    }

    pub fn filename(&self) -> Option<String> {
        self.metadata_utf8("filename")
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.get(H_UPLOAD_EXPIRES)
            .and_then(|v| OffsetDateTime::parse(v, &Rfc2822).ok())
    }

    pub fn touch_expiry(&mut self, ttl: Duration) {
        let at = OffsetDateTime::now_utc() + ttl;
        if let Ok(formatted) = at.format(&Rfc2822) {
            self.insert_raw(H_UPLOAD_EXPIRES, formatted);
        }
    }

    /// Serializes the recognized keys back to HTTP header form.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        const EMIT: [&str; 6] = [
            H_UPLOAD_OFFSET,
            H_UPLOAD_LENGTH,
            H_UPLOAD_DEFER_LENGTH,
            H_UPLOAD_METADATA,
            H_UPLOAD_CONCAT,
            H_UPLOAD_EXPIRES,
        ];
        EMIT.iter()
            .filter_map(|key| self.map.get(*key).map(|v| (*key, v.clone())))
            .collect()
    }
}

/// Parses `Upload-Metadata`: comma-separated `key SP base64(value)` pairs.
/// The value may be omitted entirely, which stands for an empty value.
pub fn parse_metadata(raw: &str) -> Result<BTreeMap<String, Vec<u8>>, InfoError> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once(' ') {
            Some((k, v)) => (k, Some(v)),
            None => (pair, None),
        };
        if key.is_empty() || !key.is_ascii() {
            return Err(InfoError::Metadata(pair.to_owned()));
        }
        let decoded = match value {
            Some(v) => BASE64
                .decode(v.trim())
                .map_err(|_| InfoError::Metadata(pair.to_owned()))?,
            None => Vec::new(),
        };
        out.insert(key.to_owned(), decoded);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_pairs_decode() {
        let parsed = parse_metadata("filename aGVsbG8udHh0,empty").unwrap();
        assert_eq!(parsed["filename"], b"hello.txt");
        assert_eq!(parsed["empty"], b"");
    }

    #[test]
    fn metadata_rejects_bad_base64() {
        assert!(parse_metadata("filename not*base64").is_err());
    }

    #[test]
    fn concat_header_forms() {
        assert_eq!(ConcatKind::parse("partial").unwrap(), ConcatKind::Partial);
        let fin = ConcatKind::parse("final;/files/a http://x/files/b").unwrap();
        assert_eq!(
            fin,
            ConcatKind::Final {
                parts: vec!["a".into(), "b".into()]
            }
        );
        assert!(ConcatKind::parse("final;").is_err());
        assert!(ConcatKind::parse("bogus").is_err());
    }

    #[test]
    fn info_roundtrips_through_json() {
        let mut info = UploadInfo::new();
        info.set_length(11);
        info.set_offset(5);
        info.insert_raw(H_UPLOAD_METADATA, "filename aGVsbG8udHh0");
        let back = UploadInfo::from_json(&info.to_json().unwrap()).unwrap();
        assert_eq!(back.length(), Some(11));
        assert_eq!(back.offset(), 5);
        assert_eq!(back.filename().as_deref(), Some("hello.txt"));
    }

    #[test]
    fn expiry_roundtrip() {
        let mut info = UploadInfo::new();
        info.touch_expiry(Duration::seconds(60));
        let at = info.expires_at().unwrap();
        assert!(at > OffsetDateTime::now_utc());
    }

    #[test]
    fn defaults_for_missing_keys() {
        let info = UploadInfo::new();
        assert_eq!(info.offset(), 0);
        assert_eq!(info.length(), None);
        assert!(!info.defer_length());
        assert!(!info.is_final());
    }
}
