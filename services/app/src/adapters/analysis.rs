//! services/app/src/adapters/analysis.rs
//!
//! This module contains the adapter for the backend analysis REST service.
//! It implements the `AnalysisBackend` port from the `core` crate, mapping
//! transport failures and server status codes onto the shared error taxonomy.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use errlens_core::domain::{
    AnalysisRequest, AnalysisResult, ResultSource, Solution, SolutionReference,
};
use errlens_core::errors::{AuthCode, CoreError};
use errlens_core::ports::{AnalysisBackend, PortResult};

/// Fixed pause between health-probe attempts.
const HEALTH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AnalysisBackend` port over HTTP.
#[derive(Clone)]
pub struct HttpAnalysisBackend {
    client: Client,
    base_url: String,
    health_retries: u32,
}

impl HttpAnalysisBackend {
    /// Creates a new `HttpAnalysisBackend`. The timeout applies to the whole
    /// analysis request; on expiry the call fails with `Timeout`, distinct
    /// from other network failures.
    pub fn new(base_url: &str, timeout: Duration, health_retries: u32) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CoreError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            health_retries: health_retries.max(1),
        })
    }
}

/// Deterministic mapping from server-returned statuses onto the taxonomy.
pub fn map_status(status: StatusCode) -> CoreError {
    match status.as_u16() {
        400 => CoreError::Validation("The analysis service rejected this image.".to_string()),
        401 => CoreError::Auth(AuthCode::RequiresRecentLogin),
        413 => CoreError::Validation(
            "The image is too large for the analysis service.".to_string(),
        ),
        429 => CoreError::RateLimited,
        503 => CoreError::ServiceUnavailable,
        code => CoreError::Unknown(format!("analysis service returned status {code}")),
    }
}

fn map_transport_error(err: reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Timeout
    } else {
        // Connectivity or cross-origin style failure: the request never got a
        // server response, so the caller may go down the offline path.
        CoreError::Unreachable(err.to_string())
    }
}

//=========================================================================================
// "Impure" Wire Record Structs
//=========================================================================================

#[derive(Serialize)]
struct AnalyzeRequestBody<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Deserialize)]
struct ReferenceRecord {
    title: String,
    url: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ReferenceRecord {
    fn to_domain(self) -> SolutionReference {
        SolutionReference {
            title: self.title,
            url: self.url,
            kind: self.kind,
        }
    }
}

#[derive(Deserialize)]
struct SolutionRecord {
    title: String,
    description: String,
    #[serde(default)]
    steps: Vec<String>,
    difficulty: Option<String>,
    success_rate: Option<f32>,
    time_estimate: Option<String>,
    requirements: Option<Vec<String>>,
    warnings: Option<Vec<String>>,
    references: Option<Vec<ReferenceRecord>>,
}

impl SolutionRecord {
    fn to_domain(self) -> Solution {
        Solution {
            title: self.title,
            description: self.description,
            steps: self.steps,
            difficulty: self.difficulty,
            success_rate: self.success_rate,
            time_estimate: self.time_estimate,
            requirements: self.requirements,
            warnings: self.warnings,
            references: self
                .references
                .map(|refs| refs.into_iter().map(ReferenceRecord::to_domain).collect()),
        }
    }
}

#[derive(Deserialize)]
struct AnalysisResponseRecord {
    analysis_id: Option<String>,
    problem: Option<String>,
    category: Option<String>,
    confidence: Option<f32>,
    severity: Option<String>,
    #[serde(default)]
    solutions: Vec<SolutionRecord>,
    prevention_tips: Option<Vec<String>>,
    related_issues: Option<Vec<String>>,
}

impl AnalysisResponseRecord {
    fn to_domain(self) -> AnalysisResult {
        AnalysisResult {
            analysis_id: self.analysis_id,
            problem: self.problem,
            category: self.category,
            confidence: self.confidence,
            severity: self.severity,
            solutions: self.solutions.into_iter().map(SolutionRecord::to_domain).collect(),
            prevention_tips: self.prevention_tips,
            related_issues: self.related_issues,
            source: ResultSource::Backend,
        }
    }
}

//=========================================================================================
// `AnalysisBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl AnalysisBackend for HttpAnalysisBackend {
    async fn analyze(&self, request: &AnalysisRequest) -> PortResult<AnalysisResult> {
        let url = format!("{}/api/analyze-error", self.base_url);
        let body = AnalyzeRequestBody {
            image: &request.image,
            context: request.context.as_deref(),
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, "analysis request rejected by backend");
            return Err(map_status(status));
        }

        let record: AnalysisResponseRecord = response
            .json()
            .await
            .map_err(|e| CoreError::Unknown(format!("malformed analysis response: {e}")))?;
        Ok(record.to_domain())
    }

    async fn health(&self) -> PortResult<()> {
        let url = format!("{}/health", self.base_url);
        let mut last_error = String::new();

        for attempt in 1..=self.health_retries {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = format!("status {}", response.status());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            if attempt < self.health_retries {
                warn!(attempt, %last_error, "health probe failed, retrying");
                tokio::time::sleep(HEALTH_RETRY_BACKOFF).await;
            }
        }

        Err(CoreError::Unreachable(format!(
            "health check failed after {} attempts: {last_error}",
            self.health_retries
        )))
    }
}
