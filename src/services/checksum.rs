use crate::services::states::db::ByteStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream;
use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("unsupported checksum algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("invalid Upload-Checksum header")]
    InvalidHeader,
    #[error("checksum mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Md5,
    Crc32,
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "md5" => Ok(Self::Md5),
            "crc32" => Ok(Self::Crc32),
            other => Err(ChecksumError::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

impl ChecksumAlgorithm {
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
            Self::Md5 => Md5::digest(data).to_vec(),
            Self::Crc32 => crc32fast::hash(data).to_be_bytes().to_vec(),
        }
    }
}

/// Splits an `Upload-Checksum` value into algorithm and base64 digest.
pub fn parse_header(raw: &str) -> Result<(ChecksumAlgorithm, String), ChecksumError> {
    let (algorithm, digest) = raw.trim().split_once(' ').ok_or(ChecksumError::InvalidHeader)?;
    Ok((algorithm.parse()?, digest.trim().to_owned()))
}

/// Digests `data` and compares against the client-supplied base64 value.
pub fn verify(
    algorithm: ChecksumAlgorithm,
    expected_b64: &str,
    data: &[u8],
) -> Result<(), ChecksumError> {
    let expected = BASE64
        .decode(expected_b64)
        .map_err(|_| ChecksumError::InvalidHeader)?;
    if algorithm.digest(data) == expected {
        Ok(())
    } else {
        Err(ChecksumError::Mismatch)
    }
}

/// Fully buffered request body for the checksum extension's second pass:
/// digest first, rewind, then hand the same bytes to persistence.
pub struct RewindableBody {
    buf: Bytes,
    pos: usize,
}

impl RewindableBody {
    pub async fn buffer(mut input: ByteStream) -> std::io::Result<Self> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = input.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Self {
            buf: buf.freeze(),
            pos: 0,
        })
    }

    pub fn read(&mut self, n: usize) -> Bytes {
        let end = (self.pos + n).min(self.buf.len());
        let out = self.buf.slice(self.pos..end);
        self.pos = end;
        out
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Remaining bytes from the current position as a one-item stream.
    pub fn into_stream(self) -> ByteStream {
        let rest = self.buf.slice(self.pos..);
        stream::once(async move { Ok(rest) }).boxed()
    }
}
