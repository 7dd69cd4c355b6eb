//! Minimal `multipart/form-data` parsing for the single `file` field the
//! upload endpoint accepts. Not a general multipart parser: the upload
//! endpoint only ever needs one field, so a small hand-rolled boundary scan
//! is simpler than pulling in a dependency for it.

use crate::error::Error;

pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Extract the `boundary=...` parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Parse a `multipart/form-data` body and return the `file` field's
/// filename and bytes.
pub fn parse_file_field(body: &[u8], boundary: &str) -> Result<UploadedFile, Error> {
    let delimiter = format!("--{}", boundary);
    let delimiter_bytes = delimiter.as_bytes();

    let parts = split_on(body, delimiter_bytes);
    for part in parts {
        let part = trim_leading_crlf(part);
        if part.is_empty() || part == b"--" {
            continue;
        }

        let header_end = match find_subslice(part, b"\r\n\r\n") {
            Some(pos) => pos,
            None => continue,
        };
        let headers = String::from_utf8_lossy(&part[..header_end]);
        if !headers.to_ascii_lowercase().contains("name=\"file\"") {
            continue;
        }

        let filename = headers
            .split(';')
            .map(str::trim)
            .find_map(|p| p.strip_prefix("filename=\""))
            .map(|s| s.trim_end_matches('"').to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        let mut data = &part[header_end + 4..];
        // strip the trailing CRLF that precedes the next boundary delimiter
        if data.ends_with(b"\r\n") {
            data = &data[..data.len() - 2];
        }

        return Ok(UploadedFile {
            filename,
            data: data.to_vec(),
        });
    }

    Err(Error::BadRequest("missing 'file' field in multipart body".into()))
}

fn trim_leading_crlf(data: &[u8]) -> &[u8] {
    if data.starts_with(b"\r\n") {
        &data[2..]
    } else {
        data
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_on<'a>(data: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = data;
    while let Some(pos) = find_subslice(rest, delimiter) {
        if pos > 0 {
            parts.push(&rest[..pos]);
        }
        rest = &rest[pos + delimiter.len()..];
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_boundary() {
        let ct = "multipart/form-data; boundary=----WebKitFormBoundaryABC123";
        assert_eq!(
            boundary_from_content_type(ct).as_deref(),
            Some("----WebKitFormBoundaryABC123")
        );
    }

    #[test]
    fn parses_single_file_field() {
        let boundary = "BOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"hello.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n--{b}--\r\n",
            b = boundary,
            content = "hello world",
        );
        let parsed = parse_file_field(body.as_bytes(), boundary).unwrap();
        assert_eq!(parsed.filename, "hello.bin");
        assert_eq!(parsed.data, b"hello world".to_vec());
    }

    #[test]
    fn missing_file_field_is_bad_request() {
        let boundary = "BOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{b}--\r\n",
            b = boundary
        );
        let err = parse_file_field(body.as_bytes(), boundary).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
