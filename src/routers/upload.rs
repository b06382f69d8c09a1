use crate::errors::{TusError, TusResult};
use crate::models::const_val::{
    CT_OFFSET_OCTET_STREAM, H_TUS_CHECKSUM_ALGORITHM, H_TUS_EXTENSION, H_TUS_MAX_SIZE,
    H_TUS_VERSION, H_UPLOAD_CHECKSUM, H_UPLOAD_CONCAT, H_UPLOAD_DEFER_LENGTH, H_UPLOAD_EXPIRES,
    H_UPLOAD_LENGTH, H_UPLOAD_METADATA, H_UPLOAD_OFFSET, TUS_CHECKSUM_ALGORITHMS, TUS_EXTENSIONS,
    TUS_VERSION, header_name,
};
use crate::models::info::{ConcatKind, UploadInfo, parse_metadata};
use crate::services::checksum::{self, RewindableBody};
use crate::services::range::{self, RangeOutcome};
use crate::services::states::TuskerState;
use crate::services::states::db::{ByteStream, StoreError};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    ETAG, LOCATION, RANGE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use rand::RngCore;
use std::sync::Arc;

fn generate_uid() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

fn body_stream(body: Body) -> ByteStream {
    body.into_data_stream()
        .map(|res| res.map_err(std::io::Error::other))
        .boxed()
}

fn parse_header_u64(headers: &HeaderMap, name: &'static str) -> TusResult<Option<u64>> {
    let Some(raw) = headers.get(name) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Some)
        .ok_or(TusError::InvalidHeader {
            header: name,
            reason: "expected a non-negative integer".into(),
        })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(header_name(name), value);
    }
}

fn apply_info_headers(headers: &mut HeaderMap, info: &UploadInfo) {
    for (name, value) in info.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

fn join_location(base: &str, uid: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), uid)
}

/// OPTIONS on the root or a concrete upload: protocol discovery.
pub async fn server_options(State(state): State<Arc<TuskerState>>) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, H_TUS_VERSION, TUS_VERSION);
    insert_header(&mut headers, H_TUS_EXTENSION, TUS_EXTENSIONS);
    insert_header(&mut headers, H_TUS_CHECKSUM_ALGORITHM, TUS_CHECKSUM_ALGORITHMS);
    if let Some(max) = state.config.upload.max_size {
        insert_header(&mut headers, H_TUS_MAX_SIZE, &max.to_string());
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}

/// POST /: the creation extension, including deferred lengths and
/// concatenation-final assembly.
pub async fn create_upload(
    State(state): State<Arc<TuskerState>>,
    uri: Uri,
    headers: HeaderMap,
) -> TusResult<Response> {
    let cfg = &state.config.upload;
    let concat = match headers.get(H_UPLOAD_CONCAT).map(|v| v.to_str()) {
        Some(Ok(raw)) => Some(ConcatKind::parse(raw)?),
        Some(Err(_)) => {
            return Err(TusError::InvalidHeader {
                header: H_UPLOAD_CONCAT,
                reason: "not valid ascii".into(),
            });
        }
        None => None,
    };
    let is_final = matches!(concat, Some(ConcatKind::Final { .. }));
    let defer = match headers.get(H_UPLOAD_DEFER_LENGTH).map(|v| v.to_str()) {
        Some(Ok("1")) => true,
        Some(_) => {
            return Err(TusError::InvalidHeader {
                header: H_UPLOAD_DEFER_LENGTH,
                reason: "only the value 1 is allowed".into(),
            });
        }
        None => false,
    };
    let length = parse_header_u64(&headers, H_UPLOAD_LENGTH)?;
    if is_final && length.is_some() {
        return Err(TusError::InvalidHeader {
            header: H_UPLOAD_LENGTH,
            reason: "must not be set for a final upload".into(),
        });
    }
    if defer && length.is_some() {
        return Err(TusError::InvalidHeader {
            header: H_UPLOAD_LENGTH,
            reason: "cannot be combined with Upload-Defer-Length".into(),
        });
    }
    if !is_final && !defer && length.is_none() {
        return Err(TusError::InvalidHeader {
            header: H_UPLOAD_LENGTH,
            reason: "missing".into(),
        });
    }
    if let (Some(max), Some(len)) = (cfg.max_size, length)
        && len > max
    {
        return Err(TusError::SizeExceeded);
    }

    let mut info = UploadInfo::new();
    if let Some(raw) = headers.get(H_UPLOAD_METADATA) {
        let raw = raw.to_str().map_err(|_| TusError::InvalidHeader {
            header: H_UPLOAD_METADATA,
            reason: "not valid ascii".into(),
        })?;
        parse_metadata(raw)?;
        info.insert_raw(H_UPLOAD_METADATA, raw);
    }
    if let Some(raw) = headers.get(H_UPLOAD_CONCAT).and_then(|v| v.to_str().ok()) {
        info.insert_raw(H_UPLOAD_CONCAT, raw);
    }
    if let Some(len) = length {
        info.set_length(len);
    }
    if defer {
        info.set_defer_length();
    }
    info.set_offset(0);
    info.touch_expiry(time::Duration::seconds(cfg.expiration_time as i64));

    let uid = generate_uid();
    state.hooks.before_create(&uid, &info).await?;
    if let Some(ConcatKind::Final { parts }) = &concat {
        concatenate_parts(&state, &uid, parts, &mut info).await?;
    } else {
        state.storage.create_file(&uid, &info).await?;
    }
    state.storage.update_info(&uid, &info).await?;
    state.hooks.after_create(&uid, &info).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&join_location(uri.path(), &uid)) {
        response_headers.insert(LOCATION, location);
    }
    apply_info_headers(&mut response_headers, &info);
    Ok((StatusCode::CREATED, response_headers).into_response())
}

/// Validates and assembles a `final` upload out of finished partial uploads.
async fn concatenate_parts(
    state: &TuskerState,
    uid: &str,
    parts: &[String],
    info: &mut UploadInfo,
) -> TusResult<u64> {
    let mut total: u64 = 0;
    for part in parts {
        let part_info = state.storage.read_info(part).await.map_err(|e| match e {
            StoreError::NotFound => TusError::InvalidHeader {
                header: H_UPLOAD_CONCAT,
                reason: format!("partial upload {part} not found"),
            },
            other => other.into(),
        })?;
        if !part_info.is_partial() {
            return Err(TusError::InvalidHeader {
                header: H_UPLOAD_CONCAT,
                reason: format!("upload {part} is not a partial upload"),
            });
        }
        match part_info.length() {
            Some(len) if part_info.offset() == len => total += len,
            _ => {
                return Err(TusError::InvalidHeader {
                    header: H_UPLOAD_CONCAT,
                    reason: format!("partial upload {part} is not finished"),
                });
            }
        }
    }
    if let Some(max) = state.config.upload.max_size
        && total > max
    {
        return Err(TusError::InvalidHeader {
            header: H_UPLOAD_CONCAT,
            reason: "combined length exceeds the maximum upload size".into(),
        });
    }
    state.storage.concatenate(uid, parts, info).await?;
    info.set_length(total);
    info.set_offset(total);
    for part in parts {
        state.locks.release(part);
    }
    Ok(total)
}

/// HEAD /{uid}: the resume point.
pub async fn head_upload(
    State(state): State<Arc<TuskerState>>,
    Path(uid): Path<String>,
) -> TusResult<Response> {
    let info = state.storage.read_info(&uid).await?;
    let mut headers = HeaderMap::new();
    apply_info_headers(&mut headers, &info);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

/// PATCH /{uid}: offset-checked append, optionally checksum-verified.
pub async fn patch_upload(
    State(state): State<Arc<TuskerState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> TusResult<Response> {
    let cfg = &state.config.upload;
    let media_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if media_type != Some(CT_OFFSET_OCTET_STREAM) {
        return Err(TusError::UnsupportedMediaType);
    }
    let client_offset =
        parse_header_u64(&headers, H_UPLOAD_OFFSET)?.ok_or(TusError::InvalidHeader {
            header: H_UPLOAD_OFFSET,
            reason: "missing".into(),
        })?;

    let _guard = state.locks.acquire(&uid).await;
    let mut info = state.storage.read_info(&uid).await?;
    if info.is_final() {
        return Err(TusError::AlreadyFinished);
    }
    if info.defer_length()
        && let Some(len) = parse_header_u64(&headers, H_UPLOAD_LENGTH)?
    {
        if len < info.offset() {
            return Err(TusError::InvalidHeader {
                header: H_UPLOAD_LENGTH,
                reason: "smaller than the current offset".into(),
            });
        }
        if let Some(max) = cfg.max_size
            && len > max
        {
            return Err(TusError::SizeExceeded);
        }
        info.set_length(len);
        info.clear_defer_length();
    }
    if client_offset != info.offset() {
        return Err(TusError::OffsetMismatch {
            expected: info.offset(),
            got: client_offset,
        });
    }
    if let Some(len) = info.length() {
        if info.offset() == len {
            return Err(TusError::AlreadyFinished);
        }
        if let Some(body_size) = content_length(&headers)
            && info.offset() + body_size > len
        {
            return Err(TusError::SizeExceeded);
        }
    }
    if let (Some(max), Some(body_size)) = (cfg.max_size, content_length(&headers))
        && info.offset() + body_size > max
    {
        return Err(TusError::SizeExceeded);
    }

    let input = match headers.get(H_UPLOAD_CHECKSUM).map(|v| v.to_str()) {
        Some(Ok(raw)) => {
            let (algorithm, digest) = checksum::parse_header(raw)?;
            let mut buffered = RewindableBody::buffer(body_stream(body))
                .await
                .map_err(StoreError::Io)?;
            checksum::verify(algorithm, &digest, buffered.as_bytes())?;
            buffered.rewind();
            buffered.into_stream()
        }
        Some(Err(_)) => {
            return Err(TusError::InvalidHeader {
                header: H_UPLOAD_CHECKSUM,
                reason: "not valid ascii".into(),
            });
        }
        None => body_stream(body),
    };

    let written = state.storage.patch_file(&uid, input, &info).await?;
    info.set_offset(info.offset() + written);
    info.touch_expiry(time::Duration::seconds(cfg.expiration_time as i64));
    state.storage.update_info(&uid, &info).await?;
    if info.length() == Some(info.offset()) {
        state.storage.finalize_file(&uid, &info).await?;
        state.hooks.after_finish(&uid, &info).await?;
    }

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, H_UPLOAD_OFFSET, &info.offset().to_string());
    if let Some(expires) = info.headers().iter().find(|(k, _)| *k == H_UPLOAD_EXPIRES) {
        insert_header(&mut response_headers, H_UPLOAD_EXPIRES, &expires.1);
    }
    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

/// GET /{uid}: range-negotiated streaming download.
pub async fn download_upload(
    State(state): State<Arc<TuskerState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> TusResult<Response> {
    let cfg = &state.config.upload;
    let info = state.storage.read_info(&uid).await?;
    if let Some(template) = &cfg.redirect_download {
        let target = template.replace("{uid}", &uid);
        let mut response_headers = HeaderMap::new();
        if let Ok(location) = HeaderValue::from_str(&target) {
            response_headers.insert(LOCATION, location);
        }
        return Ok((StatusCode::FOUND, response_headers).into_response());
    }

    let length = info.offset();
    let range_header = headers.get(RANGE).and_then(|v| v.to_str().ok());
    let (status, range) = match range::negotiate(range_header, length) {
        RangeOutcome::Full => (StatusCode::OK, None),
        RangeOutcome::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, Some(start..=end)),
        RangeOutcome::Unsatisfiable => return Err(TusError::RangeUnsatisfiable { length }),
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(etag) = HeaderValue::from_str(&format!("W/\"{uid}\"")) {
        response_headers.insert(ETAG, etag);
    }
    let content_type = info
        .content_type()
        .unwrap_or_else(|| "application/octet-stream".to_owned());
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response_headers.insert(CONTENT_TYPE, value);
    }
    let disposition = match info.filename() {
        Some(name) => format!("{}; filename=\"{}\"", cfg.disposition, name.replace('"', "")),
        None => cfg.disposition.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response_headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(range) = &range
        && let Ok(value) = HeaderValue::from_str(&format!(
            "bytes {}-{}/{}",
            range.start(),
            range.end(),
            length
        ))
    {
        response_headers.insert(CONTENT_RANGE, value);
    }

    let file = state.storage.get_file(&uid, range).await?;
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(file.length));
    Ok((status, response_headers, Body::from_stream(file.stream)).into_response())
}

/// DELETE /{uid}: the termination extension.
pub async fn terminate_upload(
    State(state): State<Arc<TuskerState>>,
    Path(uid): Path<String>,
) -> TusResult<Response> {
    let _guard = state.locks.acquire(&uid).await;
    let info = state.storage.read_info(&uid).await?;
    state.storage.delete_file(&uid).await?;
    state.hooks.after_terminate(&uid, &info).await?;
    state.locks.release(&uid);
    Ok(StatusCode::NO_CONTENT.into_response())
}
