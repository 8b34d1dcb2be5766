//! Orchestration of one pipeline run: resolve, fetch, transform, extract
//! header, load.

use std::sync::Arc;

use sluice_transport::Transport;
use sluice_warehouse::Warehouse;

use crate::error::Result;
use crate::header::extract_header;
use crate::model::PipelineRequest;
use crate::resolve::resolve;
use crate::tweak::apply_all;

/// Runs pipeline requests against an injected transport and warehouse, so
/// both collaborators can be substituted in tests. Stateless; one instance
/// serves any number of independent runs.
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    warehouse: Arc<dyn Warehouse>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>, warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            transport,
            warehouse,
        }
    }

    /// Executes every stage in order, short-circuiting on the first error.
    /// The load replaces the destination table's contents; since it is the
    /// final stage, a failed run never leaves a partial load behind.
    pub async fn run(&self, request: PipelineRequest) -> Result<()> {
        let extraction = resolve(
            &request.pre_extraction,
            request.extraction,
            self.transport.as_ref(),
        )
        .await?;
        extraction.validate()?;

        tracing::debug!(method = %extraction.method, url = %extraction.url, "extracting");
        let stream = self
            .transport
            .send(&extraction.method, &extraction.url, &extraction.body)
            .await?;

        let stream = apply_all(&request.tweaks, stream).await?;

        let (columns, rows) = extract_header(stream).await?;
        tracing::debug!(
            columns = columns.len(),
            table = %request.loading.table_id,
            "loading"
        );

        self.warehouse
            .load_table(&request.loading, &columns, rows)
            .await?;
        Ok(())
    }
}
