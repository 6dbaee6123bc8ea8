// Enqueue Use Case

use crate::domain::Job;
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Maximum accepted job id length
const MAX_ID_LEN: usize = 255;

/// Enqueue request
///
/// Mirrors the JSON job spec: `{"command": "...", "id": "...", "max_retries": 3}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub command: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: None,
            max_retries: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Parse a JSON job spec
///
/// # Errors
/// - `AppError::Validation` for invalid JSON, a non-object, a missing
///   `command`, or fields of the wrong type
pub fn parse_job_spec(spec: &str) -> Result<EnqueueRequest> {
    let value: serde_json::Value = serde_json::from_str(spec)
        .map_err(|e| AppError::Validation(format!("Invalid JSON string: {}", e)))?;

    let obj = value
        .as_object()
        .ok_or_else(|| AppError::Validation("Job spec must be a JSON object".to_string()))?;

    if !obj.contains_key("command") {
        return Err(AppError::Validation(
            "'command' field is required in JSON".to_string(),
        ));
    }

    let req: EnqueueRequest = serde_json::from_value(value)
        .map_err(|e| AppError::Validation(format!("Invalid job spec: {}", e)))?;

    validate_request(&req)?;
    Ok(req)
}

/// Validate an enqueue request before anything is written
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    if req.command.trim().is_empty() {
        return Err(AppError::Validation("'command' cannot be empty".to_string()));
    }

    if let Some(id) = &req.id {
        if id.trim().is_empty() {
            return Err(AppError::Validation("'id' cannot be empty".to_string()));
        }
        if id.len() > MAX_ID_LEN {
            return Err(AppError::Validation(format!(
                "'id' too long (max {} characters)",
                MAX_ID_LEN
            )));
        }
    }

    Ok(())
}

/// Execute enqueue use case
///
/// # Arguments
///
/// * `store` - Job store
/// * `id_provider` - ID generator, used when the request carries no id
/// * `time_provider` - Time provider (injected for determinism)
/// * `default_max_retries` - Retry ceiling when the request has none
/// * `req` - Enqueue request
pub async fn execute(
    store: &dyn JobStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    default_max_retries: u32,
    req: EnqueueRequest,
) -> Result<String> {
    validate_request(&req)?;

    let job_id = req.id.unwrap_or_else(|| id_provider.generate_id());
    let max_retries = req.max_retries.unwrap_or(default_max_retries);
    let now = time_provider.now_millis();

    let job = Job::new(job_id.clone(), req.command, max_retries, now);

    // Duplicate ids surface as DomainError::DuplicateId from the store
    store.insert(&job).await?;

    info!(job_id = %job_id, max_retries = max_retries, "Job enqueued");
    Ok(job_id)
}
