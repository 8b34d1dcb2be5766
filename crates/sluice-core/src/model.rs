//! Wire-level pipeline configuration. Field casing follows the original
//! service's JSON documents; every field defaults so partial documents
//! decode to empty values.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub use sluice_warehouse::LoadTarget;

/// Auxiliary fetch whose response supplies values for the real extraction
/// request. Skipped entirely when `method` and `url` are both empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PreExtraction {
    pub method: String,
    pub url: String,
    pub body: BTreeMap<String, String>,
    pub pattern: String,
}

/// The primary fetch. Its `body` may be replaced wholesale by pre-extraction
/// before use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Extraction {
    pub method: String,
    pub url: String,
    pub body: BTreeMap<String, String>,
}

impl Extraction {
    /// `method` and `url` must be non-empty by the time the fetch executes.
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() || self.url.is_empty() {
            return Err(PipelineError::Configuration(
                "extraction method and url must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One step of the transform chain. Decoding validates the `Call` kind, so
/// an unrecognized kind never reaches execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "TweakSpec")]
pub enum Tweak {
    /// Unwrap a zip archive, keeping the first entry only.
    Unzip,
    /// Reinterpret the byte stream from `charset` into UTF-8.
    Convert { charset: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TweakSpec {
    call: String,
    args: BTreeMap<String, String>,
}

impl TryFrom<TweakSpec> for Tweak {
    type Error = PipelineError;

    fn try_from(spec: TweakSpec) -> Result<Self> {
        match spec.call.as_str() {
            "unzip" => Ok(Tweak::Unzip),
            "convert" => Ok(Tweak::Convert {
                // A missing charset is rejected at execution, as a transform
                // failure, to match how an unknown label is handled.
                charset: spec.args.get("charset").cloned().unwrap_or_default(),
            }),
            other => Err(PipelineError::Configuration(format!(
                "unsupported call: {other:?}"
            ))),
        }
    }
}

/// Full configuration for one run, submitted as a single unit. Either every
/// stage succeeds or the run aborts with no load performed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PipelineRequest {
    pub pre_extraction: PreExtraction,
    pub extraction: Extraction,
    pub tweaks: Vec<Tweak>,
    pub loading: LoadTarget,
}
