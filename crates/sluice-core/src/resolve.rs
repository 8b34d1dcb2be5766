//! Pre-extraction: an auxiliary fetch whose response body is scraped to
//! build the real extraction request.

use regex::Regex;
use sluice_transport::{read_all, Transport, TransportError};

use crate::error::{PipelineError, Result};
use crate::expand::expand;
use crate::model::{Extraction, PreExtraction};

/// Derives the extraction to run from `base` and an optional pre-extraction
/// fetch. With no method and url configured this is a no-op and `base` is
/// returned untouched, without any transport call.
///
/// The response is read fully into memory as text; pre-extraction payloads
/// are expected to be small. The pattern is compiled before the fetch so a
/// bad pattern fails without touching the network.
pub async fn resolve(
    pre: &PreExtraction,
    base: Extraction,
    transport: &dyn Transport,
) -> Result<Extraction> {
    if pre.method.is_empty() && pre.url.is_empty() {
        return Ok(base);
    }

    let pattern = Regex::new(&pre.pattern).map_err(|err| {
        PipelineError::Configuration(format!("invalid pre-extraction pattern: {err}"))
    })?;

    let stream = transport.send(&pre.method, &pre.url, &pre.body).await?;
    let bytes = read_all(stream)
        .await
        .map_err(|err| PipelineError::Extraction(TransportError::Request(err.to_string())))?;
    let content = String::from_utf8_lossy(&bytes);

    let body = expand(&base.body, &pattern, &content);
    tracing::debug!(url = %pre.url, keys = body.len(), "pre-extraction resolved");

    Ok(Extraction {
        method: base.method,
        url: base.url,
        body,
    })
}
