//! Range-Streaming Reader (C8): HTTP byte-range responder for any
//! on-disk artifact.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Fixed chunk size artifacts are streamed in, bounding memory use.
const CHUNK_SIZE: usize = 64 * 1024;

pub struct ByteRange {
    pub start: u64,
    pub end: u64, // inclusive
}

/// Parse a `Range: bytes=a-b` header against a known artifact size.
/// Returns `Ok(None)` when there is no Range header (full-body
/// response); `Err(())` signals an unsatisfiable range (416).
pub fn parse_range(headers: &HeaderMap, size: u64) -> Result<Option<ByteRange>, ()> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| ())?;
    let spec = value.strip_prefix("bytes=").ok_or(())?;
    let (start_s, end_s) = spec.split_once('-').ok_or(())?;

    let start: u64 = if start_s.is_empty() {
        // suffix range "bytes=-N": last N bytes
        let suffix_len: u64 = end_s.parse().map_err(|_| ())?;
        size.saturating_sub(suffix_len)
    } else {
        start_s.parse().map_err(|_| ())?
    };

    if start >= size {
        return Err(());
    }

    let end: u64 = if end_s.is_empty() || start_s.is_empty() {
        size - 1
    } else {
        end_s.parse::<u64>().map_err(|_| ())?.min(size - 1)
    };

    if start > end {
        return Err(());
    }

    Ok(Some(ByteRange { start, end }))
}

/// Serve GET with full byte-range semantics for an on-disk file.
pub async fn serve_file(
    path: &Path,
    mime_type: &str,
    headers: &HeaderMap,
    head_only: bool,
) -> Response {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let size = metadata.len();

    let range = match parse_range(headers, size) {
        Ok(r) => r,
        Err(()) => {
            let mut resp = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            resp.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{size}")).unwrap(),
            );
            return resp;
        }
    };

    let mime = HeaderValue::from_str(mime_type).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    match range {
        None => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(header::CONTENT_TYPE, mime);
            response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from_str(&size.to_string()).unwrap());

            if head_only {
                return (StatusCode::OK, response_headers).into_response();
            }
            let file = match tokio::fs::File::open(path).await {
                Ok(f) => f,
                Err(_) => return StatusCode::NOT_FOUND.into_response(),
            };
            let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
            (StatusCode::OK, response_headers, Body::from_stream(stream)).into_response()
        }
        Some(ByteRange { start, end }) => {
            let len = end - start + 1;
            let mut response_headers = HeaderMap::new();
            response_headers.insert(header::CONTENT_TYPE, mime);
            response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")).unwrap(),
            );
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from_str(&len.to_string()).unwrap());

            if head_only {
                return (StatusCode::PARTIAL_CONTENT, response_headers).into_response();
            }

            let mut file = match tokio::fs::File::open(path).await {
                Ok(f) => f,
                Err(_) => return StatusCode::NOT_FOUND.into_response(),
            };
            if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            let limited = file.take(len);
            let stream = ReaderStream::with_capacity(limited, CHUNK_SIZE);
            (
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                Body::from_stream(stream),
            )
                .into_response()
        }
    }
}

/// `Content-Disposition: attachment; filename*=UTF-8''<pct-encoded>`.
pub fn content_disposition_attachment(pretty_name: &str) -> HeaderValue {
    let encoded = percent_encode(pretty_name);
    HeaderValue::from_str(&format!("attachment; filename*=UTF-8''{encoded}"))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.as_bytes() {
        match *byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_range(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn no_range_header_returns_none() {
        let headers = HeaderMap::new();
        assert!(parse_range(&headers, 4096).unwrap().is_none());
    }

    #[test]
    fn closed_range_is_clamped_to_size() {
        let headers = headers_with_range("bytes=0-99");
        let range = parse_range(&headers, 4096).unwrap().unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 99);
    }

    #[test]
    fn open_ended_range_defaults_end_to_size_minus_one() {
        let headers = headers_with_range("bytes=4000-");
        let range = parse_range(&headers, 4096).unwrap().unwrap();
        assert_eq!(range.start, 4000);
        assert_eq!(range.end, 4095);
    }

    #[test]
    fn start_beyond_size_is_unsatisfiable() {
        let headers = headers_with_range("bytes=5000-6000");
        assert!(parse_range(&headers, 4096).is_err());
    }

    #[test]
    fn end_beyond_size_is_clamped_not_rejected() {
        let headers = headers_with_range("bytes=0-999999");
        let range = parse_range(&headers, 4096).unwrap().unwrap();
        assert_eq!(range.end, 4095);
    }

    #[test]
    fn content_disposition_percent_encodes_reserved_characters() {
        let value = content_disposition_attachment("my song (live).mp4");
        assert!(value.to_str().unwrap().contains("my%20song%20%28live%29.mp4"));
    }
}
