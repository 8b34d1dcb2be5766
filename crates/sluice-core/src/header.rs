//! CSV header extraction: peel the first record off a byte stream, sanitize
//! the column names, and hand back the stream positioned at the row data.

use bytes::Bytes;
use futures::{future, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use sluice_transport::ByteStream;

use crate::error::{PipelineError, Result};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// Everything outside this set is unsafe for a warehouse column identifier.
static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\p{Pc}\p{Pd}\p{M}&%=+:'<>#|]").unwrap());

/// Replaces every disallowed character in a column name with `_`.
pub fn sanitize_column(name: &str) -> String {
    INVALID_CHARS.replace_all(name, "_").into_owned()
}

/// Reads the first CSV record from `stream` and returns the sanitized column
/// names together with the rest of the stream, positioned immediately after
/// the header line.
///
/// A leading UTF-8 byte-order mark is discarded. Quoting is permissive: a
/// quote in the middle of an unquoted field stays literal, and a quoted
/// field may contain newlines. Only the bytes up to the end of the header
/// record are buffered.
pub async fn extract_header(mut stream: ByteStream) -> Result<(Vec<String>, ByteStream)> {
    let mut buf: Vec<u8> = Vec::new();
    let mut ended = false;

    // Hold at least the potential BOM before deciding where scanning starts.
    while !ended && buf.len() < UTF8_BOM.len() {
        match stream.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            Some(Err(err)) => {
                return Err(PipelineError::Format(format!("reading header: {err}")))
            }
            None => ended = true,
        }
    }
    let start = if buf.starts_with(UTF8_BOM) {
        UTF8_BOM.len()
    } else {
        0
    };

    let boundary = loop {
        if let Some(end) = first_record_end(&buf[start..]) {
            break start + end;
        }
        if ended {
            break buf.len();
        }
        match stream.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            Some(Err(err)) => {
                return Err(PipelineError::Format(format!("reading header: {err}")))
            }
            None => ended = true,
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(&buf[start..boundary]);
    let mut record = csv::StringRecord::new();
    let got = reader
        .read_record(&mut record)
        .map_err(|err| PipelineError::Format(format!("parsing header: {err}")))?;
    if !got {
        return Err(PipelineError::Format("missing CSV header".to_string()));
    }

    let columns = record.iter().map(sanitize_column).collect();

    let rest = Bytes::copy_from_slice(&buf[boundary..]);
    let remaining = if rest.is_empty() {
        stream
    } else {
        futures::stream::once(future::ready(Ok(rest)))
            .chain(stream)
            .boxed()
    };

    Ok((columns, remaining))
}

/// Offset just past the newline ending the first record, honoring quoted
/// fields. Opening quotes are only recognized at the start of a field, so a
/// stray interior quote does not swallow the rest of the buffer.
fn first_record_end(buf: &[u8]) -> Option<usize> {
    let mut in_quotes = false;
    let mut field_start = true;
    let mut i = 0;

    while i < buf.len() {
        let byte = buf[i];
        if in_quotes {
            if byte == b'"' {
                if buf.get(i + 1) == Some(&b'"') {
                    i += 2; // escaped quote
                    continue;
                }
                in_quotes = false;
            }
            i += 1;
            continue;
        }
        match byte {
            b'"' if field_start => {
                in_quotes = true;
                field_start = false;
            }
            b',' => field_start = true,
            b'\n' => return Some(i + 1),
            _ => field_start = false,
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use sluice_transport::{from_bytes, read_all};

    async fn header_of(input: &'static [u8]) -> (Vec<String>, Vec<u8>) {
        let (columns, rest) = extract_header(from_bytes(input)).await.unwrap();
        (columns, read_all(rest).await.unwrap())
    }

    #[tokio::test]
    async fn strips_utf8_bom_before_parsing() {
        let (columns, rest) = header_of("\u{FEFF}a,b,c\n1,2,3\n".as_bytes()).await;
        assert_eq!(columns, ["a", "b", "c"]);
        assert_eq!(rest, b"1,2,3\n");
    }

    #[tokio::test]
    async fn names_already_in_allowed_set_pass_through() {
        let (columns, _) = header_of(b"a-b,c#1\n").await;
        assert_eq!(columns, ["a-b", "c#1"]);
    }

    #[tokio::test]
    async fn disallowed_characters_become_underscores() {
        let (columns, _) = header_of(b"a b,c\n").await;
        assert_eq!(columns, ["a_b", "c"]);
    }

    #[tokio::test]
    async fn quoted_newline_stays_inside_the_header_record() {
        let (columns, rest) = header_of(b"\"a\nb\",c\n1,2\n").await;
        assert_eq!(columns, ["a_b", "c"]);
        assert_eq!(rest, b"1,2\n");
    }

    #[tokio::test]
    async fn interior_quote_is_literal() {
        let (columns, _) = header_of(b"a\"b,c\n").await;
        assert_eq!(columns, ["a_b", "c"]);
    }

    #[tokio::test]
    async fn header_without_trailing_newline_consumes_everything() {
        let (columns, rest) = header_of(b"a,b").await;
        assert_eq!(columns, ["a", "b"]);
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn empty_stream_is_a_format_error() {
        let err = extract_header(sluice_transport::empty()).await.err().unwrap();
        assert!(matches!(err, PipelineError::Format(_)));
    }

    #[tokio::test]
    async fn header_split_across_many_small_chunks() {
        let chunks: Vec<_> = "\u{FEFF}x,y\n7,8\n"
            .as_bytes()
            .chunks(2)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let stream = futures::stream::iter(chunks).boxed();

        let (columns, rest) = extract_header(stream).await.unwrap();
        assert_eq!(columns, ["x", "y"]);
        assert_eq!(read_all(rest).await.unwrap(), b"7,8\n");
    }

    #[test]
    fn sanitize_keeps_unicode_letters_and_marks() {
        assert_eq!(sanitize_column("durée"), "durée");
        assert_eq!(sanitize_column("名前"), "名前");
        assert_eq!(sanitize_column("a&%=+:'<>#|b"), "a&%=+:'<>#|b");
        assert_eq!(sanitize_column("a.b(c)"), "a_b_c_");
    }
}
