//! Request decoding: extracts the uploaded image bytes from an HTTP request
//!
//! Two request shapes are accepted:
//! - a body whose `Content-Type` is `image/*`, taken as the image itself;
//! - a `multipart/form-data` body with a part named `file`.
//!
//! The declared `Content-Length` is required and checked before any byte of the body is read.

pub mod content_type;
pub mod multipart;

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use tracing::debug;

use crate::error::DecodeError;
use content_type::MediaType;

/// Form field carrying the image in multipart uploads
pub const FILE_FIELD: &str = "file";

/// Raw request payload as received
#[derive(Debug, Clone)]
pub struct InboundUpload {
    /// Raw body bytes
    pub body: Bytes,
    /// Declared content type, lowercased essence (e.g. `image/png`)
    pub content_type: String,
    /// Boundary token for multipart bodies
    pub boundary: Option<String>,
}

/// Image bytes extracted from an upload
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Bytes,
    /// Content type declared for the image itself, if any
    pub content_type: Option<String>,
    /// Client-supplied file name (multipart only)
    pub filename: Option<String>,
}

/// How the body must be interpreted, decided from headers alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadKind {
    /// The body is the image
    Direct { content_type: String },
    /// The body is `multipart/form-data`
    Multipart { boundary: String },
}

/// Parse and validate the `Content-Type` header
pub fn classify(headers: &HeaderMap) -> Result<UploadKind, DecodeError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .ok_or(DecodeError::MissingContentType)?;
    let raw = raw
        .to_str()
        .map_err(|_| DecodeError::UnsupportedContentType("<non-ascii>".to_string()))?;
    let media = MediaType::parse(raw)
        .ok_or_else(|| DecodeError::UnsupportedContentType(raw.to_string()))?;

    if media.is_image() {
        Ok(UploadKind::Direct {
            content_type: media.essence,
        })
    } else if media.is_form_data() {
        let boundary = media.boundary().ok_or(DecodeError::MissingBoundary)?;
        Ok(UploadKind::Multipart {
            boundary: boundary.to_string(),
        })
    } else {
        Err(DecodeError::UnsupportedContentType(media.essence))
    }
}

/// Parse the declared `Content-Length` and enforce the size limit
pub fn declared_length(headers: &HeaderMap, max_size: usize) -> Result<usize, DecodeError> {
    let raw = headers
        .get(header::CONTENT_LENGTH)
        .ok_or(DecodeError::MissingContentLength)?;
    let size = raw
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            DecodeError::InvalidContentLength(String::from_utf8_lossy(raw.as_bytes()).into_owned())
        })?;

    if size > max_size {
        return Err(DecodeError::BodyTooLarge { size, max_size });
    }
    Ok(size)
}

/// Validate headers, then read the body.
///
/// Header problems are reported without touching the body.
pub async fn read_upload(
    headers: &HeaderMap,
    body: Body,
    max_size: usize,
) -> Result<InboundUpload, DecodeError> {
    let declared = declared_length(headers, max_size)?;
    let kind = classify(headers)?;

    let body = axum::body::to_bytes(body, max_size)
        .await
        .map_err(|e| DecodeError::BodyRead(e.to_string()))?;

    if body.len() != declared {
        return Err(DecodeError::BodyRead(format!(
            "body length {} does not match Content-Length {}",
            body.len(),
            declared
        )));
    }

    debug!(bytes = body.len(), kind = ?kind, "Request body received");

    Ok(match kind {
        UploadKind::Direct { content_type } => InboundUpload {
            body,
            content_type,
            boundary: None,
        },
        UploadKind::Multipart { boundary } => InboundUpload {
            body,
            content_type: "multipart/form-data".to_string(),
            boundary: Some(boundary),
        },
    })
}

impl InboundUpload {
    /// Extract exactly one image from the upload
    pub fn into_image(self) -> Result<ImagePayload, DecodeError> {
        let Some(boundary) = self.boundary else {
            return Ok(ImagePayload {
                bytes: self.body,
                content_type: Some(self.content_type),
                filename: None,
            });
        };

        let parts = multipart::parse(&self.body, &boundary)?;
        let part_count = parts.len();
        let part = multipart::find_field(parts, FILE_FIELD).ok_or(DecodeError::MissingFilePart)?;

        let content_type = part.content_type().map(str::to_string);
        let filename = part.filename();
        debug!(
            parts = part_count,
            filename = ?filename,
            content_type = ?content_type,
            "Found file part in multipart body"
        );

        Ok(ImagePayload {
            bytes: part.into_body(),
            content_type,
            filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: Option<&str>, length: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(ct) = content_type {
            map.insert(header::CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        if let Some(len) = length {
            map.insert(header::CONTENT_LENGTH, HeaderValue::from_str(len).unwrap());
        }
        map
    }

    #[test]
    fn test_classify_direct_image() {
        let kind = classify(&headers(Some("image/jpeg"), None)).unwrap();
        assert_eq!(kind, UploadKind::Direct { content_type: "image/jpeg".to_string() });
    }

    #[test]
    fn test_classify_rejects_text() {
        let err = classify(&headers(Some("text/plain"), None)).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedContentType("text/plain".to_string()));
    }

    #[test]
    fn test_classify_missing_boundary() {
        let err = classify(&headers(Some("multipart/form-data"), None)).unwrap_err();
        assert_eq!(err, DecodeError::MissingBoundary);
    }

    #[test]
    fn test_classify_missing_content_type() {
        assert_eq!(classify(&HeaderMap::new()).unwrap_err(), DecodeError::MissingContentType);
    }

    #[test]
    fn test_declared_length() {
        assert_eq!(declared_length(&headers(None, Some("42")), 100).unwrap(), 42);
        assert_eq!(
            declared_length(&headers(None, None), 100).unwrap_err(),
            DecodeError::MissingContentLength
        );
        assert!(matches!(
            declared_length(&headers(None, Some("abc")), 100),
            Err(DecodeError::InvalidContentLength(_))
        ));
        assert_eq!(
            declared_length(&headers(None, Some("101")), 100).unwrap_err(),
            DecodeError::BodyTooLarge { size: 101, max_size: 100 }
        );
    }

    #[tokio::test]
    async fn test_read_upload_checks_headers_first() {
        let err = read_upload(&headers(Some("image/png"), None), Body::from("data"), 100)
            .await
            .unwrap_err();
        assert_eq!(err, DecodeError::MissingContentLength);
    }

    #[tokio::test]
    async fn test_read_upload_length_mismatch() {
        let err = read_upload(&headers(Some("image/png"), Some("10")), Body::from("data"), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::BodyRead(_)));
    }

    #[tokio::test]
    async fn test_direct_upload_into_image() {
        let upload = read_upload(&headers(Some("image/png"), Some("4")), Body::from("data"), 100)
            .await
            .unwrap();
        let image = upload.into_image().unwrap();
        assert_eq!(image.bytes.as_ref(), b"data");
        assert_eq!(image.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_multipart_without_file_part() {
        let upload = InboundUpload {
            body: Bytes::from_static(
                b"--XYZ\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nabc\r\n--XYZ--\r\n",
            ),
            content_type: "multipart/form-data".to_string(),
            boundary: Some("XYZ".to_string()),
        };
        assert_eq!(upload.into_image().unwrap_err(), DecodeError::MissingFilePart);
    }

    #[test]
    fn test_multipart_file_part() {
        let upload = InboundUpload {
            body: Bytes::from_static(
                b"--XYZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"x.png\"\r\nContent-Type: image/png\r\n\r\nabc\r\n--XYZ--\r\n",
            ),
            content_type: "multipart/form-data".to_string(),
            boundary: Some("XYZ".to_string()),
        };
        let image = upload.into_image().unwrap();
        assert_eq!(image.bytes.as_ref(), b"abc");
        assert_eq!(image.filename.as_deref(), Some("x.png"));
        assert_eq!(image.content_type.as_deref(), Some("image/png"));
    }
}
