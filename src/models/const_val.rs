use axum::http::HeaderName;

pub const TUS_VERSION: &str = "1.0.0";
pub const TUS_EXTENSIONS: &str =
    "creation,creation-defer-length,termination,expiration,concatenation,checksum";
pub const TUS_CHECKSUM_ALGORITHMS: &str = "sha1,sha256,sha384,sha512,md5,crc32";
pub const CT_OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

pub const H_TUS_RESUMABLE: &str = "Tus-Resumable";
pub const H_TUS_VERSION: &str = "Tus-Version";
pub const H_TUS_EXTENSION: &str = "Tus-Extension";
pub const H_TUS_MAX_SIZE: &str = "Tus-Max-Size";
pub const H_TUS_CHECKSUM_ALGORITHM: &str = "Tus-Checksum-Algorithm";
pub const H_UPLOAD_LENGTH: &str = "Upload-Length";
pub const H_UPLOAD_OFFSET: &str = "Upload-Offset";
pub const H_UPLOAD_DEFER_LENGTH: &str = "Upload-Defer-Length";
pub const H_UPLOAD_METADATA: &str = "Upload-Metadata";
pub const H_UPLOAD_CONCAT: &str = "Upload-Concat";
pub const H_UPLOAD_EXPIRES: &str = "Upload-Expires";
pub const H_UPLOAD_CHECKSUM: &str = "Upload-Checksum";
pub const H_METHOD_OVERRIDE: &str = "X-HTTP-Method-Override";

pub const CORS_ALLOW_METHODS: &str = "POST,GET,HEAD,PATCH,DELETE,OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Authorization,Content-Type,Origin,Tus-Resumable,\
Upload-Concat,Upload-Defer-Length,Upload-Length,Upload-Metadata,Upload-Offset,\
Upload-Checksum,X-HTTP-Method-Override,X-Requested-With";
pub const CORS_EXPOSE_HEADERS: &str = "Location,Upload-Offset,Upload-Length,Upload-Expires,\
Upload-Metadata,Upload-Concat,Upload-Defer-Length,Tus-Version,Tus-Resumable,Tus-Max-Size,\
Tus-Extension,Tus-Checksum-Algorithm";
pub const CORS_MAX_AGE: &str = "86400";

/// Builds a [`HeaderName`] from one of the constants above. The canonical
/// mixed-case strings double as keys of the stored info map, so they are not
/// kept in the lowercase form `HeaderName::from_static` would demand.
pub fn header_name(name: &'static str) -> HeaderName {
    HeaderName::from_bytes(name.as_bytes()).expect("static header name")
}
