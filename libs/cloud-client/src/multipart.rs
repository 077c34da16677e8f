//! Single-file `multipart/form-data` encoding.

use bytes::Bytes;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::io::AsyncReadExt;

use crate::error::ClientError;
use crate::request::{FormData, RequestBody};

const BOUNDARY_LEN: usize = 32;

/// Encoded upload plus the boundary-qualified content type to send with it.
#[derive(Debug)]
pub(crate) struct MultipartBody {
    pub(crate) content_type: String,
    pub(crate) body: Bytes,
}

/// Encode `body` as one file part.
///
/// # Errors
///
/// Returns [`ClientError::FormData`] if `body` is not form data and
/// [`ClientError::Io`] if the stream fails mid-read.
pub(crate) async fn encode(body: RequestBody) -> Result<MultipartBody, ClientError> {
    let RequestBody::Form(form) = body else {
        return Err(ClientError::FormData(format!(
            "expected a form data body, got {body:?}"
        )));
    };
    encode_with_boundary(form, &random_boundary()).await
}

async fn encode_with_boundary(
    mut form: FormData,
    boundary: &str,
) -> Result<MultipartBody, ClientError> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    out.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            escape_quotes(&form.key),
            escape_quotes(&form.filename)
        )
        .as_bytes(),
    );
    out.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");

    let read = form.stream.read_to_end(&mut out).await?;
    tracing::trace!(field = %form.key, bytes = read, "form data stream copied");

    out.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Ok(MultipartBody {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body: Bytes::from(out),
    })
}

fn random_boundary() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_part_layout() {
        let form = FormData::new("upload", "data.csv", &b"a,b\n1,2\n"[..]);
        let encoded = encode_with_boundary(form, "XYZ").await.unwrap();

        assert_eq!(encoded.content_type, "multipart/form-data; boundary=XYZ");
        let expected = "--XYZ\r\n\
             Content-Disposition: form-data; name=\"upload\"; filename=\"data.csv\"\r\n\
             Content-Type: application/octet-stream\r\n\
             \r\n\
             a,b\n1,2\n\
             \r\n--XYZ--\r\n";
        assert_eq!(encoded.body, Bytes::from(expected));
    }

    #[tokio::test]
    async fn test_stream_copied_byte_identical() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let form = FormData::new("file", "blob.bin", std::io::Cursor::new(payload.clone()));

        let encoded = encode(RequestBody::Form(form)).await.unwrap();
        let boundary = encoded
            .content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        assert_eq!(boundary.len(), BOUNDARY_LEN);

        let body = encoded.body.as_ref();
        let start = body
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| p + 4)
            .unwrap();
        let trailer = format!("\r\n--{boundary}--\r\n");
        let end = body.len() - trailer.len();
        assert_eq!(&body[start..end], payload.as_slice());
        assert!(body.ends_with(trailer.as_bytes()));
    }

    #[tokio::test]
    async fn test_non_form_body_rejected() {
        let err = encode(RequestBody::Raw(Bytes::from_static(b"x")))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::FormData(_)));
    }

    #[test]
    fn test_quotes_escaped() {
        assert_eq!(escape_quotes(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
