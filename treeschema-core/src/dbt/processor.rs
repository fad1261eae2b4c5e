//! Submit-then-poll workflow for server-side dbt manifest parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manifest::ManifestSource;
use super::results::{ParseResults, SaveOptions, SaveSummary, SaveTarget, apply};
use crate::client::TreeSchema;
use crate::config::PollPolicy;
use crate::entities::DataStoreRecord;
use crate::error::{ApiError, Result, TreeSchemaError};
use crate::transport::{ApiRequest, Upload};

/// Lifecycle of a manifest parse job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseState {
    NotStarted,
    #[serde(alias = "pending", alias = "queued")]
    Submitted,
    #[serde(alias = "processing", alias = "in_progress")]
    Running,
    #[serde(alias = "completed", alias = "success", alias = "succeeded")]
    Complete,
    #[serde(alias = "error", alias = "errored")]
    Failed,
}

impl ParseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ParseState::Complete | ParseState::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, ParseState::Submitted | ParseState::Running)
    }
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseState::NotStarted => "not_started",
            ParseState::Submitted => "submitted",
            ParseState::Running => "running",
            ParseState::Complete => "complete",
            ParseState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A status report for the current parse job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseStatus {
    #[serde(default)]
    pub process_id: Option<i64>,
    #[serde(rename = "status")]
    pub state: ParseState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    process_id: i64,
}

/// The dbt manifest workflow of one data store.
///
/// ```text
/// NotStarted --parse--> Submitted --poll--> Running --poll--> Complete | Failed
/// ```
///
/// A new manifest may be submitted once the previous job reached a terminal
/// state (or was never started).
#[derive(Debug, Clone)]
pub struct DbtManifest {
    session: TreeSchema,
    target: SaveTarget,
    process_id: Option<i64>,
    state: ParseState,
    message: Option<String>,
}

impl DbtManifest {
    pub(crate) fn new(session: TreeSchema, record: &DataStoreRecord) -> Self {
        Self {
            session,
            target: SaveTarget::from(record),
            process_id: None,
            state: ParseState::NotStarted,
            message: None,
        }
    }

    /// Keep the data store details used by `save_parse_results` current.
    pub(crate) fn sync(&mut self, record: &DataStoreRecord) {
        self.target = SaveTarget::from(record);
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn process_id(&self) -> Option<i64> {
        self.process_id
    }

    fn base_path(&self) -> String {
        format!("data-stores/{}/dbt-manifest", self.target.data_store_id)
    }

    fn local_status(&self) -> ParseStatus {
        ParseStatus {
            process_id: self.process_id,
            state: self.state,
            message: self.message.clone(),
            updated_at: None,
        }
    }

    /// Submit a manifest for parsing and return the server's process ID.
    ///
    /// The content is validated as JSON before anything is sent. Returns as soon
    /// as the server has accepted the upload.
    pub async fn parse_dbt_manifest(&mut self, source: impl Into<ManifestSource>) -> Result<i64> {
        if self.state.is_in_flight() {
            return Err(TreeSchemaError::InvalidState {
                expected: "no manifest parse in progress".to_string(),
                actual: self.state.to_string(),
            });
        }

        let source = source.into();
        let content = source.load().await?;
        let size = content.len();
        let body = self
            .session
            .upload(Upload {
                path: self.base_path(),
                field: "manifest".to_string(),
                file_name: source.file_name(),
                content,
            })
            .await?;
        let submitted: SubmitResponse =
            serde_json::from_value(body).map_err(|e| ApiError::ResponseParse {
                message: format!("manifest submission response: {e}"),
            })?;

        self.process_id = Some(submitted.process_id);
        self.state = ParseState::Submitted;
        self.message = None;
        info!(
            data_store = self.target.data_store_id,
            process_id = submitted.process_id,
            bytes = size,
            "Submitted dbt manifest"
        );
        Ok(submitted.process_id)
    }

    /// Ask the server for the current state of the job without waiting.
    ///
    /// Before any submission this reports `NotStarted` without a remote call.
    pub async fn get_manifest_parse_status(&mut self) -> Result<ParseStatus> {
        let Some(process_id) = self.process_id else {
            return Ok(self.local_status());
        };
        let body = self
            .session
            .send(ApiRequest::get(format!("{}/{}", self.base_path(), process_id)))
            .await?;
        let mut status: ParseStatus = parse_status(body)?;
        status.process_id.get_or_insert(process_id);
        self.state = status.state;
        self.message = status.message.clone();
        debug!(process_id, state = %status.state, "Polled manifest status");
        Ok(status)
    }

    /// Block until the job completes, using the session's poll policy.
    pub async fn wait_for_parse_complete(&mut self) -> Result<ParseStatus> {
        let policy = self.session.config().poll.clone();
        self.wait_for_parse_complete_with(&policy, None).await
    }

    /// Block until the job completes, fails, the policy's deadline passes, or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// * `InvalidState` if nothing was submitted.
    /// * `RemoteProcessing` if the server reports the job failed.
    /// * `Timeout` once `policy.timeout()` has elapsed.
    /// * `Cancelled` if the token is cancelled first.
    pub async fn wait_for_parse_complete_with(
        &mut self,
        policy: &PollPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<ParseStatus> {
        let Some(process_id) = self.process_id else {
            return Err(TreeSchemaError::InvalidState {
                expected: "a submitted manifest".to_string(),
                actual: self.state.to_string(),
            });
        };

        let started = Instant::now();
        let deadline = started + policy.timeout();
        let timed_out = || TreeSchemaError::Timeout {
            waited_secs: started.elapsed().as_secs_f64(),
        };

        let mut attempt = 0u32;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(TreeSchemaError::Cancelled);
            }

            let status = match timeout_at(deadline, self.get_manifest_parse_status()).await {
                Ok(polled) => polled?,
                Err(_) => return Err(timed_out()),
            };
            match status.state {
                ParseState::Complete => {
                    info!(process_id, polls = attempt + 1, "dbt manifest parsed");
                    return Ok(status);
                }
                ParseState::Failed => {
                    let message = status
                        .message
                        .unwrap_or_else(|| "no details reported".to_string());
                    warn!(process_id, message = message.as_str(), "dbt manifest parse failed");
                    return Err(TreeSchemaError::RemoteProcessing {
                        process_id,
                        message,
                    });
                }
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out());
            }
            let pause = policy.interval_for(attempt).min(deadline - now);
            attempt = attempt.saturating_add(1);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = sleep(pause) => {}
                        _ = token.cancelled() => return Err(TreeSchemaError::Cancelled),
                    }
                }
                None => sleep(pause).await,
            }
        }
    }

    /// Apply the parsed metadata to the catalog.
    ///
    /// Each flag of `options` gates exactly one category of change. With every
    /// flag off nothing is fetched or written.
    pub async fn save_parse_results(&mut self, options: SaveOptions) -> Result<SaveSummary> {
        if self.state != ParseState::Complete {
            return Err(TreeSchemaError::InvalidState {
                expected: ParseState::Complete.to_string(),
                actual: self.state.to_string(),
            });
        }
        if options.is_empty() {
            debug!("No save categories requested; skipping");
            return Ok(SaveSummary::default());
        }
        let results = self.get_parse_results().await?;
        let summary = apply(&self.session, &self.target, results, options).await?;
        info!(
            data_store = self.target.data_store_id,
            schemas_created = summary.schemas_created,
            fields_created = summary.fields_created,
            descriptions_updated = summary.descriptions_updated,
            tags_added = summary.tags_added,
            links_created = summary.links_created,
            "Saved dbt manifest results"
        );
        Ok(summary)
    }

    /// Fetch the metadata extracted by a completed job without applying it.
    pub async fn get_parse_results(&self) -> Result<ParseResults> {
        let (Some(process_id), ParseState::Complete) = (self.process_id, self.state) else {
            return Err(TreeSchemaError::InvalidState {
                expected: ParseState::Complete.to_string(),
                actual: self.state.to_string(),
            });
        };
        let body = self
            .session
            .send(ApiRequest::get(format!(
                "{}/{}/results",
                self.base_path(),
                process_id
            )))
            .await?;
        Ok(serde_json::from_value(body)?)
    }
}

fn parse_status(body: Value) -> Result<ParseStatus> {
    serde_json::from_value(body).map_err(|e| {
        ApiError::ResponseParse {
            message: format!("manifest status response: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_aliases() {
        let status = parse_status(json!({ "status": "completed" })).unwrap();
        assert_eq!(status.state, ParseState::Complete);
        let status = parse_status(json!({ "status": "processing", "process_id": 3 })).unwrap();
        assert_eq!(status.state, ParseState::Running);
        assert_eq!(status.process_id, Some(3));
        assert!(parse_status(json!({ "status": "exploded" })).is_err());
    }

    #[test]
    fn test_state_predicates() {
        assert!(ParseState::Submitted.is_in_flight());
        assert!(ParseState::Running.is_in_flight());
        assert!(!ParseState::Failed.is_in_flight());
        assert!(ParseState::Failed.is_terminal());
        assert_eq!(ParseState::NotStarted.to_string(), "not_started");
    }
}
