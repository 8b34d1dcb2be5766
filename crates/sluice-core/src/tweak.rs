//! Stream transforms applied between extraction and load, strictly in
//! declared order.

use std::io::{self, Cursor};

use bytes::Bytes;
use encoding_rs::{Decoder, Encoding};
use futures::StreamExt;
use sluice_transport::{from_bytes, read_all, ByteStream};
use zip::ZipArchive;

use crate::error::{PipelineError, Result};
use crate::model::Tweak;

/// Folds the tweak chain over `stream`, left to right. Each stage owns the
/// stream it receives; a failing stage drops it.
pub async fn apply_all(tweaks: &[Tweak], mut stream: ByteStream) -> Result<ByteStream> {
    for tweak in tweaks {
        stream = apply(tweak, stream).await?;
    }
    Ok(stream)
}

pub async fn apply(tweak: &Tweak, stream: ByteStream) -> Result<ByteStream> {
    match tweak {
        Tweak::Unzip => unzip(stream).await,
        Tweak::Convert { charset } => convert(charset, stream),
    }
}

/// Materializes the whole input as a zip archive and returns the first
/// entry's bytes. The only stage that buffers an entire stream; archive
/// directories cannot be read incrementally. A zero-entry archive is "no
/// data", not an error: the run proceeds and the header extractor reports
/// the missing header.
async fn unzip(stream: ByteStream) -> Result<ByteStream> {
    let bytes = read_all(stream)
        .await
        .map_err(|err| PipelineError::Transform(format!("reading archive: {err}")))?;

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| PipelineError::Transform(format!("opening archive: {err}")))?;
    if archive.len() == 0 {
        return Ok(sluice_transport::empty());
    }

    let mut entry = archive
        .by_index(0)
        .map_err(|err| PipelineError::Transform(format!("reading archive entry: {err}")))?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    io::copy(&mut entry, &mut data)
        .map_err(|err| PipelineError::Transform(format!("decompressing archive entry: {err}")))?;

    Ok(from_bytes(data))
}

/// Wraps `stream` in an adapter that decodes from `label` into UTF-8 as
/// chunks are pulled. Rejects unknown labels before consuming anything.
fn convert(label: &str, stream: ByteStream) -> Result<ByteStream> {
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| PipelineError::Transform(format!("unsupported charset: {label:?}")))?;
    Ok(decode_stream(encoding, stream))
}

struct DecodeState {
    inner: ByteStream,
    decoder: Decoder,
    done: bool,
}

fn decode_stream(encoding: &'static Encoding, stream: ByteStream) -> ByteStream {
    let state = DecodeState {
        inner: stream,
        decoder: encoding.new_decoder(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let text = decode_chunk(&mut state.decoder, &chunk, false);
                    if text.is_empty() {
                        // Chunk ended mid-character; the decoder holds the
                        // partial bytes until the next chunk.
                        continue;
                    }
                    return Some((Ok(Bytes::from(text)), state));
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    let text = decode_chunk(&mut state.decoder, &[], true);
                    if text.is_empty() {
                        return None;
                    }
                    return Some((Ok(Bytes::from(text)), state));
                }
            }
        }
    })
    .boxed()
}

fn decode_chunk(decoder: &mut Decoder, input: &[u8], last: bool) -> String {
    let capacity = decoder
        .max_utf8_buffer_length(input.len())
        .unwrap_or(input.len() * 3 + 4);
    let mut out = String::with_capacity(capacity);
    // Capacity covers the worst case, so one call consumes the whole chunk.
    // Malformed sequences become replacement characters.
    let _ = decoder.decode_to_string(input, &mut out, last);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn zip_with_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn unzip_yields_first_entry_bytes() {
        let archive = zip_with_entries(&[
            ("first.csv", b"a,b\n1,2\n"),
            ("second.csv", b"ignored\n"),
        ]);

        let out = apply(&Tweak::Unzip, from_bytes(archive)).await.unwrap();
        assert_eq!(read_all(out).await.unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn unzip_of_empty_archive_is_no_data_not_an_error() {
        let archive = zip_with_entries(&[]);

        let out = apply(&Tweak::Unzip, from_bytes(archive)).await.unwrap();
        assert!(read_all(out).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unzip_rejects_malformed_archive() {
        let err = apply(&Tweak::Unzip, from_bytes(&b"definitely not a zip"[..]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Transform(_)));
    }

    #[tokio::test]
    async fn convert_decodes_shift_jis() {
        // "こんにちは" in Shift_JIS.
        let encoded: &[u8] = &[0x82, 0xB1, 0x82, 0xF1, 0x82, 0xC9, 0x82, 0xBF, 0x82, 0xCD];

        let tweak = Tweak::Convert {
            charset: "Shift_JIS".to_string(),
        };
        let out = apply(&tweak, from_bytes(encoded)).await.unwrap();
        assert_eq!(read_all(out).await.unwrap(), "こんにちは".as_bytes());
    }

    #[tokio::test]
    async fn convert_handles_chunks_split_mid_character() {
        let chunks = vec![
            Ok(Bytes::from_static(&[0x82])),
            Ok(Bytes::from_static(&[0xB1, 0x82])),
            Ok(Bytes::from_static(&[0xF1])),
        ];
        let stream = futures::stream::iter(chunks).boxed();

        let tweak = Tweak::Convert {
            charset: "shift_jis".to_string(),
        };
        let out = apply(&tweak, stream).await.unwrap();
        assert_eq!(read_all(out).await.unwrap(), "こん".as_bytes());
    }

    #[tokio::test]
    async fn convert_rejects_unknown_charset_without_consuming() {
        let tweak = Tweak::Convert {
            charset: "klingon-8".to_string(),
        };
        let err = apply(&tweak, sluice_transport::empty()).await.err().unwrap();
        assert!(matches!(err, PipelineError::Transform(_)));
    }

    #[tokio::test]
    async fn chain_applies_in_declared_order() {
        // Shift_JIS-encoded CSV inside a zip: unzip then convert.
        let encoded: &[u8] = &[0x82, 0xB1, 0x2C, 0x82, 0xF1, 0x0A]; // "こ,ん\n"
        let archive = zip_with_entries(&[("data.csv", encoded)]);

        let tweaks = vec![
            Tweak::Unzip,
            Tweak::Convert {
                charset: "Shift_JIS".to_string(),
            },
        ];
        let out = apply_all(&tweaks, from_bytes(archive)).await.unwrap();
        assert_eq!(read_all(out).await.unwrap(), "こ,ん\n".as_bytes());
    }
}
