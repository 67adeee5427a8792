//! S3-wire-compatible file surface.
//!
//! Bucket name maps to a project (`project_<id>` or bare `<id>`); object
//! keys are paths under the project's files directory. Listing answers
//! ListObjectsV2 XML; object bodies are binary with MD5-hex ETags.
//!
//! Authentication accepts, in order: a bearer API key, an `X-Api-Key`
//! header, AWS SigV4 against the configured access-key pair, or a
//! SigV4-presigned query URL.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::auth;
use crate::error::AppError;
use crate::ops;
use crate::state::{blocking, App};
use cormorant_protocol::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// `project_123` and `123` both address project `123`.
fn extract_project_id(bucket: &str) -> &str {
    bucket.strip_prefix("project_").unwrap_or(bucket)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn error_xml(code: &str, message: &str, resource: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource></Error>",
        xml_escape(code),
        xml_escape(message),
        xml_escape(resource)
    )
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response()
}

// ============================================================================
// SigV4
// ============================================================================

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn uri_encode(value: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn canonical_query(pairs: &BTreeMap<String, String>, skip: &[&str]) -> String {
    pairs
        .iter()
        .filter(|(k, _)| !skip.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_query(raw: Option<&str>) -> BTreeMap<String, String> {
    let mut pairs = BTreeMap::new();
    let Some(raw) = raw else {
        return pairs;
    };
    for part in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        pairs.insert(percent_decode(key), percent_decode(value));
    }
    pairs
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                match u8::from_str_radix(&value[i + 1..i + 3], 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

struct SigV4Parts {
    access_key_id: String,
    date: String,
    region: String,
    service: String,
    signed_headers: Vec<String>,
    signature: String,
    timestamp: String,
}

fn parse_authorization_sigv4(headers: &HeaderMap) -> Option<SigV4Parts> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let rest = value.strip_prefix("AWS4-HMAC-SHA256 ")?;
    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("Credential=") {
            credential = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("Signature=") {
            signature = Some(v.to_string());
        }
    }
    let credential = credential?;
    let scope: Vec<&str> = credential.split('/').collect();
    // <access-key-id>/<date>/<region>/<service>/aws4_request
    if scope.len() != 5 {
        return None;
    }
    let timestamp = headers
        .get("x-amz-date")
        .and_then(|v| v.to_str().ok())?
        .to_string();
    Some(SigV4Parts {
        access_key_id: scope[0].to_string(),
        date: scope[1].to_string(),
        region: scope[2].to_string(),
        service: scope[3].to_string(),
        signed_headers: signed_headers?
            .split(';')
            .map(|h| h.to_ascii_lowercase())
            .collect(),
        signature: signature?,
        timestamp,
    })
}

fn verify_sigv4(
    app: &App,
    parts: &SigV4Parts,
    method: &Method,
    path: &str,
    query: &BTreeMap<String, String>,
    headers: &HeaderMap,
    presigned: bool,
) -> bool {
    if parts.access_key_id != app.config.s3_access_key_id {
        return false;
    }

    let mut canonical_headers = String::new();
    for name in &parts.signed_headers {
        let value = headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .trim();
        canonical_headers.push_str(&format!("{name}:{value}\n"));
    }

    let payload_hash = if presigned {
        "UNSIGNED-PAYLOAD".to_string()
    } else {
        headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("UNSIGNED-PAYLOAD")
            .to_string()
    };

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        uri_encode(path, false),
        canonical_query(query, &["X-Amz-Signature"]),
        canonical_headers,
        parts.signed_headers.join(";"),
        payload_hash
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        parts.date, parts.region, parts.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        parts.timestamp,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(
        &app.config.s3_secret_access_key,
        &parts.date,
        &parts.region,
        &parts.service,
    );
    let expected = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    let matches = expected == parts.signature;
    if !matches {
        debug!(expected = %expected, got = %parts.signature, "SigV4 signature mismatch");
    }
    matches
}

fn parse_presigned(query: &BTreeMap<String, String>) -> Option<SigV4Parts> {
    if query.get("X-Amz-Algorithm").map(String::as_str) != Some("AWS4-HMAC-SHA256") {
        return None;
    }
    let credential = query.get("X-Amz-Credential")?;
    let scope: Vec<&str> = credential.split('/').collect();
    if scope.len() != 5 {
        return None;
    }
    Some(SigV4Parts {
        access_key_id: scope[0].to_string(),
        date: scope[1].to_string(),
        region: scope[2].to_string(),
        service: scope[3].to_string(),
        signed_headers: query
            .get("X-Amz-SignedHeaders")?
            .split(';')
            .map(|h| h.to_ascii_lowercase())
            .collect(),
        signature: query.get("X-Amz-Signature")?.to_string(),
        timestamp: query.get("X-Amz-Date")?.to_string(),
    })
}

/// Authorize an S3 request against the target project.
fn authorize(
    app: &App,
    headers: &HeaderMap,
    method: &Method,
    path: &str,
    query: &BTreeMap<String, String>,
    project_id: &str,
) -> Result<(), Response> {
    // Bearer / X-Api-Key: same credentials as the REST API.
    if let Some(key) = auth::extract_api_key(headers) {
        if !key.starts_with("AWS4-HMAC-SHA256") {
            return match auth::authenticate(app, &key) {
                Ok(auth::Principal::Admin) => Ok(()),
                Ok(auth::Principal::ApiKey {
                    project_id: key_project,
                    ..
                }) if key_project == project_id => Ok(()),
                _ => Err(xml_response(
                    StatusCode::FORBIDDEN,
                    error_xml("AccessDenied", "Access denied", path),
                )),
            };
        }
    }

    // SigV4 Authorization header.
    if let Some(parts) = parse_authorization_sigv4(headers) {
        if verify_sigv4(app, &parts, method, path, query, headers, false) {
            return Ok(());
        }
        warn!(path, "SigV4 verification failed");
        return Err(xml_response(
            StatusCode::FORBIDDEN,
            error_xml("SignatureDoesNotMatch", "Signature does not match", path),
        ));
    }

    // Presigned query URL.
    if let Some(parts) = parse_presigned(query) {
        if verify_sigv4(app, &parts, method, path, query, headers, true) {
            return Ok(());
        }
        return Err(xml_response(
            StatusCode::FORBIDDEN,
            error_xml("SignatureDoesNotMatch", "Signature does not match", path),
        ));
    }

    Err(xml_response(
        StatusCode::FORBIDDEN,
        error_xml("AccessDenied", "Missing credentials", path),
    ))
}

async fn validate_project(app: Arc<App>, project_id: String) -> Result<(), Response> {
    let exists = blocking(move || Ok(app.catalog().get_project(&project_id)?.is_some())).await;
    match exists {
        Ok(true) => Ok(()),
        Ok(false) => Err(xml_response(
            StatusCode::NOT_FOUND,
            error_xml("NoSuchBucket", "The specified bucket does not exist", ""),
        )),
        Err(err) => Err(err.into_response()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn format_s3_timestamp(time: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    datetime.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
}

pub async fn list_objects(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = parse_query(raw_query.as_deref());
    let project_id = extract_project_id(&bucket).to_string();
    let path = format!("/s3/{bucket}");
    if let Err(response) = authorize(&app, &headers, &Method::GET, &path, &query, &project_id) {
        return response;
    }
    if let Err(response) = validate_project(app.clone(), project_id.clone()).await {
        return response;
    }

    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let max_keys: usize = query
        .get("max-keys")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);
    let continuation = query.get("continuation-token").cloned();

    let objects = {
        let app = app.clone();
        let project_id = project_id.clone();
        let prefix = prefix.clone();
        blocking(move || ops::files::s3_list_objects(&app, &project_id, &prefix)).await
    };
    let mut objects = match objects {
        Ok(objects) => objects,
        Err(err) => return err.into_response(),
    };

    // Continuation token is the last key of the previous page.
    if let Some(token) = &continuation {
        objects.retain(|(key, _, _)| key.as_str() > token.as_str());
    }
    let is_truncated = objects.len() > max_keys;
    objects.truncate(max_keys);
    let next_token = if is_truncated {
        objects.last().map(|(key, _, _)| key.clone())
    } else {
        None
    };

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><ListBucketResult>");
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(&bucket)));
    xml.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(&prefix)));
    xml.push_str(&format!("<MaxKeys>{max_keys}</MaxKeys>"));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", objects.len()));
    xml.push_str(&format!("<IsTruncated>{is_truncated}</IsTruncated>"));
    if let Some(token) = &continuation {
        xml.push_str(&format!(
            "<ContinuationToken>{}</ContinuationToken>",
            xml_escape(token)
        ));
    }
    if let Some(token) = &next_token {
        xml.push_str(&format!(
            "<NextContinuationToken>{}</NextContinuationToken>",
            xml_escape(token)
        ));
    }
    for (key, size, modified) in &objects {
        xml.push_str(&format!(
            "<Contents><Key>{}</Key><LastModified>{}</LastModified><Size>{}</Size>\
             <StorageClass>STANDARD</StorageClass></Contents>",
            xml_escape(key),
            format_s3_timestamp(*modified),
            size
        ));
    }
    xml.push_str("</ListBucketResult>");
    xml_response(StatusCode::OK, xml)
}

pub async fn get_object(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = parse_query(raw_query.as_deref());
    let project_id = extract_project_id(&bucket).to_string();
    let path = format!("/s3/{bucket}/{key}");
    if let Err(response) = authorize(&app, &headers, &Method::GET, &path, &query, &project_id) {
        return response;
    }

    let object_path = {
        let app = app.clone();
        let project_id = project_id.clone();
        let key = key.clone();
        blocking(move || ops::files::s3_object_path(&app, &project_id, &key)).await
    };
    let object_path = match object_path {
        Ok(path) => path,
        Err(err) => return err.into_response(),
    };
    if !object_path.is_file() {
        return xml_response(
            StatusCode::NOT_FOUND,
            error_xml("NoSuchKey", "The specified key does not exist", &path),
        );
    }

    // ETag from content; streamed body from disk.
    let etag_path = object_path.clone();
    let etag = blocking(move || {
        let bytes = std::fs::read(&etag_path).map_err(cormorant_storage::StorageError::from)?;
        Ok(hex::encode(Md5::digest(&bytes)))
    })
    .await;
    let etag = match etag {
        Ok(etag) => etag,
        Err(err) => return err.into_response(),
    };

    let file = match tokio::fs::File::open(&object_path).await {
        Ok(file) => file,
        Err(err) => {
            return AppError(ApiError::internal(format!("Failed to open object: {err}")))
                .into_response()
        }
    };
    let size = file
        .metadata()
        .await
        .map(|meta| meta.len())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (header::ETAG, format!("\"{etag}\"")),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

pub async fn put_object(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    body: axum::body::Bytes,
) -> Response {
    let query = parse_query(raw_query.as_deref());
    let project_id = extract_project_id(&bucket).to_string();
    let path = format!("/s3/{bucket}/{key}");
    if let Err(response) = authorize(&app, &headers, &Method::PUT, &path, &query, &project_id) {
        return response;
    }
    if let Err(response) = validate_project(app.clone(), project_id.clone()).await {
        return response;
    }
    if body.len() as i64 > app.config.max_file_size_bytes {
        return xml_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            error_xml("EntityTooLarge", "Object exceeds the maximum size", &path),
        );
    }

    let etag = hex::encode(Md5::digest(&body));
    let result = {
        let app = app.clone();
        let project_id = project_id.clone();
        let key = key.clone();
        let etag = etag.clone();
        blocking(move || {
            let object_path = ops::files::s3_object_path(&app, &project_id, &key)?;
            if let Some(parent) = object_path.parent() {
                std::fs::create_dir_all(parent).map_err(cormorant_storage::StorageError::from)?;
            }
            std::fs::write(&object_path, &body).map_err(cormorant_storage::StorageError::from)?;
            ops::files::s3_register_object(&app, &project_id, &key, body.len() as i64, &etag)?;
            Ok(())
        })
        .await
    };
    if let Err(err) = result {
        return err.into_response();
    }

    (StatusCode::OK, [(header::ETAG, format!("\"{etag}\""))]).into_response()
}

pub async fn head_object(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = parse_query(raw_query.as_deref());
    let project_id = extract_project_id(&bucket).to_string();
    let path = format!("/s3/{bucket}/{key}");
    if let Err(response) = authorize(&app, &headers, &Method::HEAD, &path, &query, &project_id) {
        return response;
    }

    let metadata = {
        let app = app.clone();
        blocking(move || {
            let object_path = ops::files::s3_object_path(&app, &project_id, &key)?;
            if !object_path.is_file() {
                return Ok(None);
            }
            let meta =
                std::fs::metadata(&object_path).map_err(cormorant_storage::StorageError::from)?;
            let bytes =
                std::fs::read(&object_path).map_err(cormorant_storage::StorageError::from)?;
            Ok(Some((meta.len(), hex::encode(Md5::digest(&bytes)))))
        })
        .await
    };
    match metadata {
        Ok(Some((size, etag))) => (
            StatusCode::OK,
            [
                (header::CONTENT_LENGTH, size.to_string()),
                (header::ETAG, format!("\"{etag}\"")),
            ],
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn delete_object(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = parse_query(raw_query.as_deref());
    let project_id = extract_project_id(&bucket).to_string();
    let path = format!("/s3/{bucket}/{key}");
    if let Err(response) = authorize(&app, &headers, &Method::DELETE, &path, &query, &project_id) {
        return response;
    }

    let result = {
        let app = app.clone();
        blocking(move || {
            let object_path = ops::files::s3_object_path(&app, &project_id, &key)?;
            if object_path.is_file() {
                std::fs::remove_file(&object_path)
                    .map_err(cormorant_storage::StorageError::from)?;
            }
            let relative = format!("project_{project_id}/{key}");
            if let Some(record) = app.catalog().find_file_by_path(&project_id, &relative)? {
                app.catalog().delete_file(&record.id)?;
            }
            Ok(())
        })
        .await
    };
    match result {
        // DeleteObject is idempotent: 204 whether or not the key existed.
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
