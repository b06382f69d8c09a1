use crate::models::const_val::{H_TUS_VERSION, TUS_VERSION, header_name};
use crate::models::info::InfoError;
use crate::services::checksum::ChecksumError;
use crate::services::hooks::HookError;
use crate::services::states::db::StoreError;
use axum::http::header::{CONTENT_RANGE, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Non-standard tus status for a failed `Upload-Checksum` verification.
const CHECKSUM_MISMATCH: u16 = 460;

#[derive(Debug, thiserror::Error)]
pub enum TusError {
    #[error("upload not found")]
    NotFound,
    #[error("invalid {header} header: {reason}")]
    InvalidHeader {
        header: &'static str,
        reason: String,
    },
    #[error("offset mismatch: upload is at {expected}, request carried {got}")]
    OffsetMismatch { expected: u64, got: u64 },
    #[error("PATCH requires content type application/offset+octet-stream")]
    UnsupportedMediaType,
    #[error("unsupported tus protocol version")]
    UnsupportedVersion,
    #[error("upload size exceeds the allowed limit")]
    SizeExceeded,
    #[error("requested range not satisfiable")]
    RangeUnsatisfiable { length: u64 },
    #[error("upload is already complete")]
    AlreadyFinished,
    #[error(transparent)]
    Info(#[from] InfoError),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TusResult<T> = Result<T, TusError>;

impl TusError {
    pub fn status(&self) -> StatusCode {
        match self {
            TusError::NotFound => StatusCode::NOT_FOUND,
            TusError::InvalidHeader { .. } | TusError::Info(_) => StatusCode::BAD_REQUEST,
            TusError::OffsetMismatch { .. } => StatusCode::CONFLICT,
            TusError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            TusError::UnsupportedVersion => StatusCode::PRECONDITION_FAILED,
            TusError::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            TusError::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            TusError::AlreadyFinished => StatusCode::FORBIDDEN,
            TusError::Checksum(ChecksumError::Mismatch) => {
                StatusCode::from_u16(CHECKSUM_MISMATCH).unwrap_or(StatusCode::BAD_REQUEST)
            }
            TusError::Checksum(_) => StatusCode::BAD_REQUEST,
            TusError::Hook(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TusError::Store(e) => match e {
                StoreError::NotFound => StatusCode::NOT_FOUND,
                StoreError::UnevenChunks { .. } => StatusCode::BAD_REQUEST,
                StoreError::MaxSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for TusError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        if status == StatusCode::PRECONDITION_FAILED {
            headers.insert(header_name(H_TUS_VERSION), HeaderValue::from_static(TUS_VERSION));
        }
        if let TusError::RangeUnsatisfiable { length } = &self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{length}"))
        {
            headers.insert(CONTENT_RANGE, value);
        }
        (status, headers, self.to_string()).into_response()
    }
}
