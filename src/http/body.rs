//! Request body size enforcement.

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{header, HeaderMap};
use bytes::BytesMut;
use futures::StreamExt;
use thiserror::Error;
use tracing::{trace, warn};

/// Smallest body limit accepted; lower configured values are raised to this.
pub const MIN_BODY_LIMIT_BYTES: u64 = 128;

/// Why a body was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BodyRejection {
    /// `Content-Length` declares more than the limit
    #[error("declared body of {declared} bytes exceeds limit of {limit} bytes")]
    DeclaredTooLarge { declared: u64, limit: u64 },

    /// The streamed body grew past the limit
    #[error("body exceeds limit of {limit} bytes")]
    TooLarge { limit: u64 },

    /// The body stream failed before completing
    #[error("failed to read request body: {0}")]
    ReadFailed(String),
}

/// Enforces a maximum request body size.
#[derive(Debug, Clone, Copy)]
pub struct RequestBodyGuard {
    limit: u64,
}

impl RequestBodyGuard {
    /// Create a guard, raising `limit` to [`MIN_BODY_LIMIT_BYTES`] if needed.
    pub fn new(limit: u64) -> Self {
        if limit < MIN_BODY_LIMIT_BYTES {
            warn!(
                configured = limit,
                floor = MIN_BODY_LIMIT_BYTES,
                "Request body limit below floor, raising it"
            );
        }
        Self {
            limit: limit.max(MIN_BODY_LIMIT_BYTES),
        }
    }

    /// Effective byte limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reject on the declared `Content-Length` without touching the body.
    pub fn precheck(&self, headers: &HeaderMap) -> Result<(), BodyRejection> {
        let Some(value) = headers.get(header::CONTENT_LENGTH) else {
            return Ok(());
        };

        let declared = match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(declared) => declared,
            None => {
                warn!(content_length = ?value, "Ignoring non-numeric Content-Length");
                return Ok(());
            }
        };

        if declared > self.limit {
            return Err(BodyRejection::DeclaredTooLarge {
                declared,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Read the body, stopping as soon as it exceeds the limit.
    ///
    /// At most `limit` plus one chunk is buffered. Stream errors are rejections.
    pub async fn enforce(&self, body: Body) -> Result<Bytes, BodyRejection> {
        if let Some(exact) = body.size_hint().exact() {
            if exact > self.limit {
                return Err(BodyRejection::TooLarge { limit: self.limit });
            }
        }

        let mut stream = body.into_data_stream();
        let mut buffer = BytesMut::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BodyRejection::ReadFailed(e.to_string()))?;
            let total = buffer.len() as u64 + chunk.len() as u64;
            if total > self.limit {
                trace!(read = total, limit = self.limit, "Body stream exceeded limit");
                return Err(BodyRejection::TooLarge { limit: self.limit });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use futures::stream;
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const CHUNK: usize = 64;

    fn counting_body(chunks: usize, read: Arc<AtomicU64>) -> Body {
        let stream = stream::iter(0..chunks).map(move |_| {
            read.fetch_add(CHUNK as u64, Ordering::SeqCst);
            Ok::<_, io::Error>(Bytes::from(vec![b'x'; CHUNK]))
        });
        Body::from_stream(stream)
    }

    #[test]
    fn test_floor_is_enforced() {
        assert_eq!(RequestBodyGuard::new(1).limit(), MIN_BODY_LIMIT_BYTES);
        assert_eq!(RequestBodyGuard::new(65_536).limit(), 65_536);
    }

    #[test]
    fn test_precheck() {
        let guard = RequestBodyGuard::new(150);
        let mut headers = HeaderMap::new();
        assert!(guard.precheck(&headers).is_ok());

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("150"));
        assert!(guard.precheck(&headers).is_ok());

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("151"));
        assert_eq!(
            guard.precheck(&headers),
            Err(BodyRejection::DeclaredTooLarge {
                declared: 151,
                limit: 150
            })
        );

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert!(guard.precheck(&headers).is_ok());
    }

    #[tokio::test]
    async fn test_small_body_passes_through_unchanged() {
        let guard = RequestBodyGuard::new(150);
        let bytes = guard.enforce(Body::from("{\"text\":\"hi\"}")).await.unwrap();
        assert_eq!(&bytes[..], b"{\"text\":\"hi\"}");
    }

    #[tokio::test]
    async fn test_known_length_is_rejected_up_front() {
        let guard = RequestBodyGuard::new(150);
        let result = guard.enforce(Body::from(vec![b'x'; 500])).await;
        assert_eq!(result, Err(BodyRejection::TooLarge { limit: 150 }));
    }

    #[tokio::test]
    async fn test_stream_stops_after_one_chunk_past_limit() {
        let guard = RequestBodyGuard::new(150);
        let read = Arc::new(AtomicU64::new(0));

        let result = guard.enforce(counting_body(100, Arc::clone(&read))).await;

        assert_eq!(result, Err(BodyRejection::TooLarge { limit: 150 }));
        assert!(read.load(Ordering::SeqCst) <= 150 + CHUNK as u64);
    }

    #[tokio::test]
    async fn test_stream_within_limit_is_collected() {
        let guard = RequestBodyGuard::new(150);
        let read = Arc::new(AtomicU64::new(0));

        let bytes = guard.enforce(counting_body(2, read)).await.unwrap();
        assert_eq!(bytes.len(), 2 * CHUNK);
    }

    #[tokio::test]
    async fn test_stream_error_fails_closed() {
        let guard = RequestBodyGuard::new(1_024);
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")),
        ];
        let body = Body::from_stream(stream::iter(chunks));

        let result = guard.enforce(body).await;
        assert!(matches!(result, Err(BodyRejection::ReadFailed(_))));
    }
}
