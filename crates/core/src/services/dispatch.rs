//! Processing dispatch.
//!
//! Decides where the transcode-and-republish step runs: in this process
//! ([`InlineDispatcher`]) or in a batch job submitted to the cluster
//! ([`ClusterJobDispatcher`]). Callers only see [`ProcessingDispatcher`].

use std::sync::Arc;
use std::time::Duration;

use notes_common::config::{ClusterJobConfig, ProcessingConfig, ProcessingMode};
use notes_common::{AppError, AppResult, IdGenerator};
use serde_json::{Value, json};

use super::file::FileService;
use crate::fanout::fan_out;

/// Random characters appended to every job name.
const JOB_NAME_SUFFIX_LEN: usize = 8;

/// Runs the per-file processing step for a note's object keys.
#[async_trait::async_trait]
pub trait ProcessingDispatcher: Send + Sync {
    /// Hand `object_keys` of note `note_id` off for processing.
    async fn dispatch(&self, note_id: &str, object_keys: &[String]) -> AppResult<()>;
}

/// Shared dispatcher handle.
pub type DispatcherService = Arc<dyn ProcessingDispatcher>;

/// Build the dispatcher selected by `processing.mode`.
pub fn build_dispatcher(
    config: &ProcessingConfig,
    files: FileService,
) -> AppResult<DispatcherService> {
    match config.mode {
        ProcessingMode::Inline => Ok(Arc::new(InlineDispatcher::new(files))),
        ProcessingMode::Cluster => Ok(Arc::new(ClusterJobDispatcher::new(
            config.cluster.clone(),
        )?)),
    }
}

/// Processes every file in the calling process and waits for all of them.
#[derive(Clone)]
pub struct InlineDispatcher {
    files: FileService,
}

impl InlineDispatcher {
    /// Create a new inline dispatcher.
    #[must_use]
    pub const fn new(files: FileService) -> Self {
        Self { files }
    }

    /// Process all keys concurrently and return each outcome, in input order.
    pub async fn process_all(&self, object_keys: &[String]) -> Vec<AppResult<String>> {
        let files = self.files.clone();
        fan_out(object_keys.to_vec(), move |key| {
            let files = files.clone();
            async move { files.process(&key).await }
        })
        .await
    }
}

#[async_trait::async_trait]
impl ProcessingDispatcher for InlineDispatcher {
    async fn dispatch(&self, note_id: &str, object_keys: &[String]) -> AppResult<()> {
        let results = self.process_all(object_keys).await;

        let mut failed = 0usize;
        for (key, result) in object_keys.iter().zip(&results) {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!(
                    note_id = %note_id,
                    key = %key,
                    error = %e,
                    "File processing failed"
                );
            }
        }

        tracing::info!(
            note_id = %note_id,
            total = object_keys.len(),
            failed = failed,
            "Inline processing finished"
        );
        Ok(())
    }
}

/// Submits one batch job per note to the cluster API and returns.
#[derive(Clone)]
pub struct ClusterJobDispatcher {
    config: ClusterJobConfig,
    http_client: reqwest::Client,
}

impl ClusterJobDispatcher {
    /// Create a new cluster dispatcher.
    ///
    /// Trusts the cluster CA at `ca_cert_path` when the file exists.
    pub fn new(config: ClusterJobConfig) -> AppResult<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));

        if config.ca_cert_path.exists() {
            let pem = std::fs::read(&config.ca_cert_path).map_err(|e| {
                AppError::Config(format!(
                    "Failed to read cluster CA {}: {e}",
                    config.ca_cert_path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| AppError::Config(format!("Invalid cluster CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http_client = builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Fresh name for a job that processes a note's files.
    ///
    /// Each submission gets its own suffix, so a retry never collides with
    /// a job the cluster still keeps from an earlier attempt.
    #[must_use]
    pub fn job_name(note_id: &str) -> String {
        let id = IdGenerator::new().generate();
        let suffix = &id[id.len() - JOB_NAME_SUFFIX_LEN..];
        format!("process-note-files-job-{note_id}-{suffix}")
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.config.api_url.trim_end_matches('/'),
            self.config.namespace
        )
    }

    /// The `batch/v1` Job submitted for a note.
    #[must_use]
    pub fn job_manifest(&self, job_name: &str, note_id: &str, object_keys: &[String]) -> Value {
        let env_from: Vec<Value> = self
            .config
            .secret_refs
            .iter()
            .map(|name| json!({ "secretRef": { "name": name } }))
            .collect();

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": job_name,
                "namespace": self.config.namespace,
            },
            "spec": {
                "backoffLimit": self.config.backoff_limit,
                "ttlSecondsAfterFinished": self.config.ttl_seconds_after_finished,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "process-files",
                            "image": self.config.image,
                            "command": self.config.command,
                            "args": [
                                "process-files",
                                "--note",
                                note_id,
                                "--files",
                                object_keys.join(","),
                            ],
                            "envFrom": env_from,
                        }],
                    },
                },
            },
        })
    }

    async fn bearer_token(&self) -> AppResult<String> {
        let token = tokio::fs::read_to_string(&self.config.token_path)
            .await
            .map_err(|e| {
                AppError::Dispatch(format!(
                    "Failed to read service account token {}: {e}",
                    self.config.token_path.display()
                ))
            })?;
        Ok(token.trim().to_string())
    }
}

#[async_trait::async_trait]
impl ProcessingDispatcher for ClusterJobDispatcher {
    async fn dispatch(&self, note_id: &str, object_keys: &[String]) -> AppResult<()> {
        let token = self.bearer_token().await?;
        let job_name = Self::job_name(note_id);
        let manifest = self.job_manifest(&job_name, note_id, object_keys);

        let response = self
            .http_client
            .post(self.jobs_url())
            .bearer_auth(token)
            .json(&manifest)
            .send()
            .await
            .map_err(|e| AppError::Dispatch(format!("Failed to submit job: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Dispatch(format!(
                "Cluster rejected job {job_name} ({status}): {body}"
            )));
        }

        tracing::info!(
            note_id = %note_id,
            job = %job_name,
            files = object_keys.len(),
            "Submitted processing job"
        );
        Ok(())
    }
}
