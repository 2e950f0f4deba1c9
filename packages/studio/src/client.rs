//! Backend collaborator: the HTTP contracts behind the studio.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::check::Check;
use crate::config::{BackendConfig, MAX_RETRIES_LIMIT};
use crate::error::{Result, StudioError};
use crate::rule::{Rule, RuleInput};
use crate::tester::{ExpressionRequest, ExpressionResult, TestPayload, TestResult};
use crate::types::{DynamicParameter, NewParameter, ParameterSchema, ParameterUpdate, Section};

/// User agent string identifying this client.
const USER_AGENT: &str = concat!("wagewatch-studio/", env!("CARGO_PKG_VERSION"));

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Longest single backoff sleep (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Everything the studio asks of the backend.
///
/// Implemented over HTTP by [`HttpBackend`]; tests use an in-memory fake.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_parameters(&self) -> Result<ParameterSchema>;

    async fn add_parameter(
        &self,
        section: Section,
        param: &NewParameter,
    ) -> Result<DynamicParameter>;

    async fn update_parameter(
        &self,
        section: Section,
        param: &str,
        update: &ParameterUpdate,
    ) -> Result<DynamicParameter>;

    async fn remove_parameter(&self, section: Section, param: &str) -> Result<()>;

    async fn list_rules(&self) -> Result<Vec<Rule>>;

    async fn get_rule(&self, rule_id: &str) -> Result<Rule>;

    async fn create_rule(&self, rule: &RuleInput) -> Result<Rule>;

    /// `rule_id` addresses the stored rule; `rule.rule_id` may differ when
    /// the id is being renamed.
    async fn update_rule(&self, rule_id: &str, rule: &RuleInput) -> Result<Rule>;

    async fn delete_rule(&self, rule_id: &str) -> Result<()>;

    async fn test_rule(&self, payload: &TestPayload) -> Result<TestResult>;

    async fn test_expression(&self, request: &ExpressionRequest) -> Result<ExpressionResult>;

    async fn generate_checks(&self, rule_description: &str) -> Result<Vec<Check>>;
}

/// reqwest-backed implementation of [`Backend`].
///
/// NOTE: Do NOT derive `Debug` on this struct, `api_token` would be exposed.
pub struct HttpBackend {
    http: reqwest::Client,
    api_base_url: String,
    api_token: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRuleRequest<'a> {
    rule_description: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    message: Option<serde_json::Value>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.clone(),
            api_token: config.api_token.clone(),
            max_retries: config.max_retries.clamp(1, MAX_RETRIES_LIMIT),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_base_url, path);
        let builder = self.http.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send once, or with retries when the call is safe to repeat.
    ///
    /// Retries cover connection failures, timeouts and 5xx answers.
    async fn send(&self, builder: RequestBuilder, idempotent: bool) -> Result<Response> {
        let attempts = if idempotent { self.max_retries } else { 1 };
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying backend request");
                tokio::time::sleep(delay).await;
            }

            let Some(request) = builder.try_clone() else {
                return Ok(builder.send().await?);
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt + 1 < attempts {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            max_retries = attempts,
                            "backend server error, will retry"
                        );
                        last_error = Some(format!("server error: {status}"));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt + 1 < attempts => {
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = attempts,
                        "backend connection error, will retry"
                    );
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(StudioError::Network(e)),
            }
        }

        Err(StudioError::RetriesExhausted {
            attempts,
            message: last_error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder, idempotent: bool) -> Result<T> {
        let response = self.send(builder, idempotent).await?;
        let response = check_status(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| StudioError::ResponseParse(e.to_string()))
    }

    async fn call_empty(&self, builder: RequestBuilder) -> Result<()> {
        let response = self.send(builder, false).await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Exponential backoff before retry `attempt` (1-based): 250ms, 500ms,
/// 1000ms, ... capped at [`RETRY_MAX_DELAY_MS`].
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(
        RETRY_BASE_DELAY_MS
            .saturating_mul(factor)
            .min(RETRY_MAX_DELAY_MS),
    )
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Turn a non-2xx response into an error, keeping the backend's message.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(StudioError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StudioError::Backend {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    let extracted = serde_json::from_str::<ErrorBody>(body).ok().and_then(|b| {
        [b.detail, b.error, b.message]
            .into_iter()
            .flatten()
            .find_map(|v| message_text(&v))
    });
    match extracted {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

/// `detail` is a string for handled errors and a list of `{msg}` objects
/// for request validation failures.
fn message_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::Object(obj) => obj
                        .get("msg")
                        .and_then(|m| m.as_str())
                        .map(str::to_string),
                    other => message_text(other),
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        serde_json::Value::Object(obj) => obj
            .get("message")
            .or_else(|| obj.get("msg"))
            .and_then(message_text),
        _ => None,
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_parameters(&self) -> Result<ParameterSchema> {
        self.call(self.request(Method::GET, "/dynamic-params"), true)
            .await
    }

    async fn add_parameter(
        &self,
        section: Section,
        param: &NewParameter,
    ) -> Result<DynamicParameter> {
        let path = format!("/dynamic-params/{section}");
        self.call(self.request(Method::POST, &path).json(param), false)
            .await
    }

    async fn update_parameter(
        &self,
        section: Section,
        param: &str,
        update: &ParameterUpdate,
    ) -> Result<DynamicParameter> {
        let path = format!("/dynamic-params/{section}/{}", segment(param));
        self.call(self.request(Method::PUT, &path).json(update), false)
            .await
    }

    async fn remove_parameter(&self, section: Section, param: &str) -> Result<()> {
        let path = format!("/dynamic-params/{section}/{}", segment(param));
        self.call_empty(self.request(Method::DELETE, &path)).await
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.call(self.request(Method::GET, "/labor-law-rules"), true)
            .await
    }

    async fn get_rule(&self, rule_id: &str) -> Result<Rule> {
        let path = format!("/labor-law-rules/{}", segment(rule_id));
        self.call(self.request(Method::GET, &path), true).await
    }

    async fn create_rule(&self, rule: &RuleInput) -> Result<Rule> {
        self.call(
            self.request(Method::POST, "/labor-law-rules").json(rule),
            false,
        )
        .await
    }

    async fn update_rule(&self, rule_id: &str, rule: &RuleInput) -> Result<Rule> {
        let path = format!("/labor-law-rules/{}", segment(rule_id));
        self.call(self.request(Method::PUT, &path).json(rule), false)
            .await
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<()> {
        let path = format!("/labor-law-rules/{}", segment(rule_id));
        self.call_empty(self.request(Method::DELETE, &path)).await
    }

    async fn test_rule(&self, payload: &TestPayload) -> Result<TestResult> {
        self.call(
            self.request(Method::POST, "/labor-law-rules/test").json(payload),
            true,
        )
        .await
    }

    async fn test_expression(&self, request: &ExpressionRequest) -> Result<ExpressionResult> {
        self.call(
            self.request(Method::POST, "/test-expression").json(request),
            true,
        )
        .await
    }

    async fn generate_checks(&self, rule_description: &str) -> Result<Vec<Check>> {
        let body: serde_json::Value = self
            .call(
                self.request(Method::POST, "/generate-rule")
                    .json(&GenerateRuleRequest { rule_description }),
                false,
            )
            .await?;
        parse_generated_checks(body)
    }
}

/// Extract `generated_checks`, which must be an array of checks.
pub(crate) fn parse_generated_checks(body: serde_json::Value) -> Result<Vec<Check>> {
    match body.get("generated_checks") {
        Some(serde_json::Value::Array(items)) => {
            serde_json::from_value(serde_json::Value::Array(items.clone()))
                .map_err(|e| StudioError::ResponseParse(e.to_string()))
        }
        _ => Err(StudioError::ResponseParse(
            "generated_checks is not an array".to_string(),
        )),
    }
}

/// Test utilities for the backend seam.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    use crate::config::IDENTITY_PARAMS;

    /// State behind [`MockBackend`]. Tests poke at it directly.
    #[derive(Debug, Default)]
    pub struct MockState {
        pub schema: ParameterSchema,
        pub rules: Vec<Rule>,
        pub test_result: Option<TestResult>,
        pub expression_result: Option<ExpressionResult>,
        pub generated: Option<serde_json::Value>,
        pub failure: Option<(u16, String)>,
        pub unauthorized: bool,
        pub calls: Vec<String>,
        pub last_test_payload: Option<TestPayload>,
        next_id: u32,
    }

    /// In-memory backend that records every call.
    #[derive(Debug, Default)]
    pub struct MockBackend {
        state: Mutex<MockState>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn with_rules(rules: Vec<Rule>) -> Self {
            let backend = Self::new();
            backend.state().rules = rules;
            backend
        }

        /// Every subsequent call fails with this status and message.
        pub fn fail_with(&self, status: u16, message: &str) {
            self.state().failure = Some((status, message.to_string()));
        }

        pub fn succeed(&self) {
            let mut state = self.state();
            state.failure = None;
            state.unauthorized = false;
        }

        pub fn calls(&self) -> Vec<String> {
            self.state().calls.clone()
        }

        pub fn call_count(&self) -> usize {
            self.state().calls.len()
        }

        fn enter(&self, call: String) -> Result<MutexGuard<'_, MockState>> {
            let mut state = self.state();
            state.calls.push(call);
            if state.unauthorized {
                return Err(StudioError::Unauthorized);
            }
            if let Some((status, message)) = state.failure.clone() {
                return Err(StudioError::Backend { status, message });
            }
            Ok(state)
        }
    }

    fn section_mut(schema: &mut ParameterSchema, section: Section) -> &mut Vec<DynamicParameter> {
        match section {
            Section::Payslip => &mut schema.payslip,
            Section::Attendance => &mut schema.attendance,
            Section::Contract => &mut schema.contract,
            Section::Employee => &mut schema.employee,
        }
    }

    fn bad_request(message: String) -> StudioError {
        StudioError::Backend {
            status: 400,
            message,
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn list_parameters(&self) -> Result<ParameterSchema> {
            let state = self.enter("GET /dynamic-params".into())?;
            Ok(state.schema.clone())
        }

        async fn add_parameter(
            &self,
            section: Section,
            param: &NewParameter,
        ) -> Result<DynamicParameter> {
            let mut state = self.enter(format!("POST /dynamic-params/{section}"))?;
            let params = section_mut(&mut state.schema, section);
            if params.iter().any(|p| p.param == param.param) {
                return Err(bad_request(format!(
                    "Parameter '{}' already exists in {section}",
                    param.param
                )));
            }
            let created = DynamicParameter {
                param: param.param.clone(),
                label_en: param.label_en.clone(),
                label_he: param.label_he.clone(),
                description: param.description.clone(),
                param_type: param.param_type.clone().into(),
            };
            params.push(created.clone());
            Ok(created)
        }

        async fn update_parameter(
            &self,
            section: Section,
            param: &str,
            update: &ParameterUpdate,
        ) -> Result<DynamicParameter> {
            let mut state = self.enter(format!("PUT /dynamic-params/{section}/{param}"))?;
            let existing = section_mut(&mut state.schema, section)
                .iter_mut()
                .find(|p| p.param == param)
                .ok_or_else(|| bad_request(format!("Parameter '{param}' not found")))?;
            existing.label_en = update.label_en.clone();
            existing.label_he = update.label_he.clone();
            existing.description = update.description.clone();
            Ok(existing.clone())
        }

        async fn remove_parameter(&self, section: Section, param: &str) -> Result<()> {
            let mut state = self.enter(format!("DELETE /dynamic-params/{section}/{param}"))?;
            if IDENTITY_PARAMS.contains(&param) {
                return Err(bad_request(format!("Cannot remove '{param}'")));
            }
            section_mut(&mut state.schema, section).retain(|p| p.param != param);
            Ok(())
        }

        async fn list_rules(&self) -> Result<Vec<Rule>> {
            let state = self.enter("GET /labor-law-rules".into())?;
            Ok(state.rules.clone())
        }

        async fn get_rule(&self, rule_id: &str) -> Result<Rule> {
            let state = self.enter(format!("GET /labor-law-rules/{rule_id}"))?;
            state
                .rules
                .iter()
                .find(|r| r.rule_id == rule_id)
                .cloned()
                .ok_or_else(|| StudioError::Backend {
                    status: 404,
                    message: "Rule not found".into(),
                })
        }

        async fn create_rule(&self, rule: &RuleInput) -> Result<Rule> {
            let mut state = self.enter("POST /labor-law-rules".into())?;
            state.next_id += 1;
            let rule_id = format!("rule_{}", state.next_id);
            let mut created = rule.clone().into_rule(rule_id);
            created.created_date = Some("2024-07-01T00:00:00Z".into());
            state.rules.push(created.clone());
            Ok(created)
        }

        async fn update_rule(&self, rule_id: &str, rule: &RuleInput) -> Result<Rule> {
            let mut state = self.enter(format!("PUT /labor-law-rules/{rule_id}"))?;
            let new_id = if rule.rule_id.is_empty() {
                rule_id.to_string()
            } else {
                rule.rule_id.clone()
            };
            let slot = state
                .rules
                .iter_mut()
                .find(|r| r.rule_id == rule_id)
                .ok_or_else(|| StudioError::Backend {
                    status: 404,
                    message: "Rule not found".into(),
                })?;
            let mut updated = rule.clone().into_rule(new_id);
            updated.created_date = slot.created_date.clone();
            updated.updated_date = Some("2024-07-02T00:00:00Z".into());
            *slot = updated.clone();
            Ok(updated)
        }

        async fn delete_rule(&self, rule_id: &str) -> Result<()> {
            let mut state = self.enter(format!("DELETE /labor-law-rules/{rule_id}"))?;
            state.rules.retain(|r| r.rule_id != rule_id);
            Ok(())
        }

        async fn test_rule(&self, payload: &TestPayload) -> Result<TestResult> {
            let mut state = self.enter("POST /labor-law-rules/test".into())?;
            state.last_test_payload = Some(payload.clone());
            Ok(state.test_result.clone().unwrap_or_else(|| TestResult {
                success: true,
                rule_id: payload.rule_id.clone(),
                rule_name: payload.name.clone(),
                ..Default::default()
            }))
        }

        async fn test_expression(&self, _request: &ExpressionRequest) -> Result<ExpressionResult> {
            let state = self.enter("POST /test-expression".into())?;
            Ok(state.expression_result.clone().unwrap_or_default())
        }

        async fn generate_checks(&self, _rule_description: &str) -> Result<Vec<Check>> {
            let state = self.enter("POST /generate-rule".into())?;
            let body = state
                .generated
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "generated_checks": [] }));
            drop(state);
            parse_generated_checks(body)
        }
    }
}
