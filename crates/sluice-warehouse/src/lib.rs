//! Warehouse load abstraction and the BigQuery REST implementation used in
//! production.
//!
//! The loader performs a resumable-upload CSV load job: one request to open
//! an upload session, one streamed PUT carrying the row data, then polling
//! until the job reports `DONE`. Row bytes are never buffered here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use serde::{Deserialize, Serialize};
use sluice_transport::ByteStream;
use thiserror::Error;

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Identifies the destination table. Existence and permissions are enforced
/// by the warehouse itself, not here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadTarget {
    #[serde(rename = "ProjectID", alias = "projectId", default)]
    pub project_id: String,
    #[serde(rename = "DatasetID", alias = "datasetId", default)]
    pub dataset_id: String,
    #[serde(rename = "TableID", alias = "tableId", default)]
    pub table_id: String,
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("warehouse request failed: {0}")]
    Http(String),
    #[error("warehouse returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("load job failed: {0}")]
    Job(String),
}

impl WarehouseError {
    fn from_http(err: impl std::fmt::Display) -> Self {
        Self::Http(err.to_string())
    }
}

/// Narrow contract for replacing a table's contents with a stream of CSV
/// rows. `columns` is the sanitized header, in order; every column is loaded
/// as text.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn load_table(
        &self,
        target: &LoadTarget,
        columns: &[String],
        rows: ByteStream,
    ) -> Result<(), WarehouseError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    configuration: JobConfiguration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobConfiguration {
    load: LoadConfiguration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration {
    destination_table: TableReference,
    schema: TableSchema,
    source_format: &'static str,
    write_disposition: &'static str,
    allow_quoted_newlines: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Serialize)]
struct TableSchema {
    fields: Vec<FieldSchema>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

enum TokenSource {
    Gcp(Arc<dyn gcp_auth::TokenProvider>),
    Fixed(String),
}

impl TokenSource {
    async fn bearer(&self) -> Result<String, WarehouseError> {
        match self {
            TokenSource::Gcp(provider) => {
                let token = provider
                    .token(&[BIGQUERY_SCOPE])
                    .await
                    .map_err(|err| WarehouseError::Auth(err.to_string()))?;
                Ok(token.as_str().to_string())
            }
            TokenSource::Fixed(token) => Ok(token.clone()),
        }
    }
}

/// Thin BigQuery client: truncate-then-load of CSV rows, all columns typed
/// as `STRING`.
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    auth: TokenSource,
    base_url: String,
}

impl BigQueryWarehouse {
    /// Connects using application-default credentials.
    pub async fn new() -> Result<Self, WarehouseError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|err| WarehouseError::Auth(err.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            auth: TokenSource::Gcp(provider),
            base_url: "https://bigquery.googleapis.com".to_string(),
        })
    }

    /// Targets a custom endpoint with a fixed bearer token. Intended for
    /// emulators and tests.
    pub fn with_endpoint(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth: TokenSource::Fixed(token.into()),
            base_url: base_url.into(),
        }
    }

    fn load_job(target: &LoadTarget, columns: &[String]) -> JobResource {
        JobResource {
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    destination_table: TableReference {
                        project_id: target.project_id.clone(),
                        dataset_id: target.dataset_id.clone(),
                        table_id: target.table_id.clone(),
                    },
                    schema: TableSchema {
                        fields: columns
                            .iter()
                            .map(|name| FieldSchema {
                                name: name.clone(),
                                field_type: "STRING",
                            })
                            .collect(),
                    },
                    source_format: "CSV",
                    write_disposition: "WRITE_TRUNCATE",
                    allow_quoted_newlines: true,
                },
            },
        }
    }

    async fn open_session(
        &self,
        token: &str,
        target: &LoadTarget,
        columns: &[String],
    ) -> Result<String, WarehouseError> {
        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=resumable",
            self.base_url, target.project_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .json(&Self::load_job(target, columns))
            .send()
            .await
            .map_err(WarehouseError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| WarehouseError::Http("upload session URI missing".to_string()))
    }

    async fn upload_rows(
        &self,
        token: &str,
        session: &str,
        rows: ByteStream,
    ) -> Result<Job, WarehouseError> {
        let response = self
            .client
            .put(session)
            .bearer_auth(token)
            .body(reqwest::Body::wrap_stream(rows))
            .send()
            .await
            .map_err(WarehouseError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(WarehouseError::from_http)
    }

    async fn wait_for_done(
        &self,
        token: &str,
        target: &LoadTarget,
        mut job: Job,
    ) -> Result<(), WarehouseError> {
        loop {
            if let Some(status) = &job.status {
                if status.state == "DONE" {
                    return match &status.error_result {
                        Some(error) => Err(WarehouseError::Job(error.message.clone())),
                        None => Ok(()),
                    };
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;

            let mut url = format!(
                "{}/bigquery/v2/projects/{}/jobs/{}",
                self.base_url, target.project_id, job.job_reference.job_id
            );
            if let Some(location) = &job.job_reference.location {
                url.push_str(&format!("?location={location}"));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(WarehouseError::from_http)?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(WarehouseError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            job = response.json().await.map_err(WarehouseError::from_http)?;
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn load_table(
        &self,
        target: &LoadTarget,
        columns: &[String],
        rows: ByteStream,
    ) -> Result<(), WarehouseError> {
        let token = self.auth.bearer().await?;
        let session = self.open_session(&token, target, columns).await?;
        tracing::debug!(
            project = %target.project_id,
            dataset = %target.dataset_id,
            table = %target.table_id,
            "upload session opened"
        );
        let job = self.upload_rows(&token, &session, rows).await?;
        self.wait_for_done(&token, target, job).await
    }
}
