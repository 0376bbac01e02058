use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::metrics;
use crate::errors::BackendError;
use crate::schemas::attempt::{
    ActiveAttempt, AttemptPayload, AttemptSummary, Eligibility, SaveAck, SaveProgressRequest,
    StartAttemptRequest, SubmitRequest, SubmitResponse,
};
use crate::schemas::exam::Exam;
use crate::schemas::result::ExamResult;
use crate::services::backend::ExamBackend;

const MAX_ERROR_DETAIL_CHARS: usize = 300;

/// Whether a failed call may be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Reads, plus saves and submits the server keys on the response id.
    OnTransient,
    /// Creating or reopening an attempt: a duplicate may burn an attempt.
    Never,
}

#[derive(Debug, Clone)]
pub struct HttpBackendOptions {
    pub base_url: String,
    pub api_token: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl HttpBackendOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let backend = settings.backend();
        Self {
            base_url: backend.base_url.as_str().to_string(),
            api_token: backend.api_token.clone(),
            request_timeout: backend.request_timeout(),
            connect_timeout: backend.connect_timeout(),
            max_retries: backend.max_retries,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// REST client for the student exam endpoints.
#[derive(Debug, Clone)]
pub struct HttpExamBackend {
    client: Client,
    base_url: Url,
    api_token: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl HttpExamBackend {
    pub fn new(options: HttpBackendOptions) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .context("Failed to build exam service HTTP client")?;

        let base_url = Url::parse(options.base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid exam service url {}", options.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Exam service url {} cannot carry a path", options.base_url);
        }

        Ok(Self {
            client,
            base_url,
            api_token: options.api_token,
            max_retries: options.max_retries,
            retry_base_delay: options.retry_base_delay,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(HttpBackendOptions::from_settings(settings))
    }

    /// Appends each segment percent-encoded, so ids cannot alter the route.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        retry: Retry,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
    ) -> Result<T, BackendError> {
        let url = self.endpoint(segments);
        let request_id = Uuid::new_v4().to_string();
        let max_retries = match retry {
            Retry::OnTransient => self.max_retries,
            Retry::Never => 0,
        };
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            let outcome = self
                .send_once(operation, method.clone(), url.clone(), &request_id, body.as_ref())
                .await;
            metrics::record_backend_request(operation, started.elapsed().as_secs_f64());

            match outcome {
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    let backoff = self.retry_base_delay * 2_u32.pow(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Exam service request failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        request_id: &str,
        body: Option<&Value>,
    ) -> Result<T, BackendError> {
        let mut request = self.client.request(method, url).header("X-Request-Id", request_id);
        if !self.api_token.is_empty() {
            request = request.bearer_auth(&self.api_token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response =
            request.send().await.map_err(|err| classify_transport_error(operation, err))?;
        let status = response.status();
        let raw_body =
            response.text().await.map_err(|err| classify_transport_error(operation, err))?;

        tracing::debug!(operation, request_id, status = status.as_u16(), "Exam service responded");

        if is_transient_status(status) {
            return Err(BackendError::Transient {
                operation,
                message: format!("status {}: {}", status.as_u16(), extract_error_message(&raw_body)),
            });
        }
        if !status.is_success() {
            return Err(BackendError::Rejected {
                operation,
                status: status.as_u16(),
                detail: extract_error_message(&raw_body),
            });
        }

        let payload = if raw_body.trim().is_empty() { "{}" } else { raw_body.as_str() };
        serde_json::from_str(payload)
            .map_err(|err| BackendError::Decode { operation, message: err.to_string() })
    }
}

#[async_trait]
impl ExamBackend for HttpExamBackend {
    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam, BackendError> {
        self.call(
            "fetch_exam",
            Retry::OnTransient,
            Method::GET,
            &["student", "exams", exam_id],
            None,
        )
        .await
    }

    async fn check_eligibility(&self, exam_id: &str) -> Result<Eligibility, BackendError> {
        self.call(
            "check_eligibility",
            Retry::OnTransient,
            Method::GET,
            &["student", "exams", exam_id, "eligibility"],
            None,
        )
        .await
    }

    async fn active_attempt(&self, exam_id: &str) -> Result<ActiveAttempt, BackendError> {
        self.call(
            "active_attempt",
            Retry::OnTransient,
            Method::GET,
            &["student", "exams", exam_id, "active-attempt"],
            None,
        )
        .await
    }

    async fn start_attempt(
        &self,
        exam_id: &str,
        request: &StartAttemptRequest,
    ) -> Result<AttemptPayload, BackendError> {
        let body = encode_body("start_attempt", request)?;
        self.call(
            "start_attempt",
            Retry::Never,
            Method::POST,
            &["student", "exams", exam_id, "start"],
            Some(body),
        )
        .await
    }

    async fn resume_attempt(&self, exam_id: &str) -> Result<AttemptPayload, BackendError> {
        self.call(
            "resume_attempt",
            Retry::Never,
            Method::POST,
            &["student", "exams", exam_id, "resume"],
            None,
        )
        .await
    }

    async fn save_progress(&self, request: &SaveProgressRequest) -> Result<SaveAck, BackendError> {
        let body = encode_body("save_progress", request)?;
        self.call(
            "save_progress",
            Retry::OnTransient,
            Method::PUT,
            &["student", "exams", request.exam_id.as_str(), "save-progress"],
            Some(body),
        )
        .await
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, BackendError> {
        let body = encode_body("submit", request)?;
        self.call(
            "submit",
            Retry::OnTransient,
            Method::POST,
            &["student", "exams", request.exam_id.as_str(), "submit"],
            Some(body),
        )
        .await
    }

    async fn attempt_history(&self, exam_id: &str) -> Result<Vec<AttemptSummary>, BackendError> {
        self.call(
            "attempt_history",
            Retry::OnTransient,
            Method::GET,
            &["student", "exams", exam_id, "attempts"],
            None,
        )
        .await
    }

    async fn fetch_results(&self, response_id: &str) -> Result<ExamResult, BackendError> {
        self.call(
            "fetch_results",
            Retry::OnTransient,
            Method::GET,
            &["student", "exam-responses", response_id, "results"],
            None,
        )
        .await
    }

    async fn fetch_detailed_results(&self, response_id: &str) -> Result<ExamResult, BackendError> {
        self.call(
            "fetch_detailed_results",
            Retry::OnTransient,
            Method::GET,
            &["student", "exam-responses", response_id, "detailed"],
            None,
        )
        .await
    }
}

fn encode_body(operation: &'static str, body: &impl serde::Serialize) -> Result<Value, BackendError> {
    serde_json::to_value(body)
        .map_err(|err| BackendError::Decode { operation, message: err.to_string() })
}

fn classify_transport_error(operation: &'static str, err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { operation }
    } else if err.is_decode() {
        BackendError::Decode { operation, message: err.to_string() }
    } else {
        BackendError::Transient { operation, message: err.to_string() }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn extract_error_message(raw_body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(raw_body) {
        for key in ["error", "detail", "message"] {
            if let Some(message) = parsed.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }

    let trimmed = raw_body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
}
