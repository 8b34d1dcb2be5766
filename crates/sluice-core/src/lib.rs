//! Declarative extract-transform-load pipeline engine: fetch a dataset over
//! HTTP, optionally deriving the request body from a prior fetch, run the
//! payload through an ordered chain of stream transforms, and hand the
//! resulting CSV to a warehouse loader.

pub mod error;
pub mod expand;
pub mod header;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod tweak;

pub use error::{PipelineError, Result};
pub use model::{Extraction, LoadTarget, PipelineRequest, PreExtraction, Tweak};
pub use pipeline::Pipeline;
