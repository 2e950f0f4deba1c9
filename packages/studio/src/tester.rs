//! Rule and expression test orchestration.
//!
//! Both testers share the same request discipline: every request is issued
//! a [`RequestToken`] carrying a generation number and a context. For rule
//! tests the context is the id of the rule under test; expression tests
//! carry whatever context the caller set (usually the selected rule). Completing a
//! token clears its pending flag exactly once. The response is shown only
//! if the context is still active, so a slow answer for a rule the user has
//! navigated away from is dropped instead of overwriting the view.
//!
//! For callers that can hold the tester across the await, `run` does all
//! three steps. Callers that need to keep using the tester while a request
//! is outstanding use `begin`, the free `execute`, and `complete`.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::check::Check;
use crate::client::Backend;
use crate::draft::RuleDraft;
use crate::error::{Result, StudioError};
use crate::form::{DynamicFormData, FieldMap, IncludeSections};
use crate::rule::Rule;
use crate::types::Section;

/// Amounts are compared to this tolerance when checking backend totals.
const AMOUNT_TOLERANCE: f64 = 1e-6;

/// One check as sent to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCheck {
    pub id: String,
    pub condition: String,
    pub amount_owed: String,
    pub violation_message: String,
}

/// Body of `POST /labor-law-rules/test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPayload {
    pub rule_id: String,
    pub name: String,
    pub checks: Vec<PayloadCheck>,
    pub payslip: FieldMap,
    pub attendance: FieldMap,
    pub contract: FieldMap,
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// A condition that failed to evaluate comes back as `null` next to
/// `condition_error`; it did not fire.
fn null_as_false<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Per-check verdict from the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub check_id: String,
    #[serde(default, deserialize_with = "null_as_false")]
    pub condition_result: bool,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub amount_owed: f64,
    #[serde(default)]
    pub violation_message: String,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub condition_error: Option<String>,
    #[serde(default)]
    pub amount_error: Option<String>,
}

/// Evaluator verdict for a whole rule.
///
/// Failed tests use the same shape with only `error` set, so there is a
/// single rendering path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub total_violations: u32,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub total_amount_owed: f64,
    #[serde(default)]
    pub check_results: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Disagreement between the backend's totals and its own check results.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityIssue {
    ViolationCount { reported: u32, counted: u32 },
    AmountOwed { reported: f64, summed: f64 },
}

impl TestResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn violations(&self) -> impl Iterator<Item = &CheckResult> {
        self.check_results.iter().filter(|c| c.condition_result)
    }

    /// Compare the reported totals with the check results.
    ///
    /// The totals are never replaced by the recomputed values; this only
    /// reports when they differ.
    pub fn integrity_issues(&self) -> Vec<IntegrityIssue> {
        if self.is_failure() {
            return Vec::new();
        }
        let mut issues = Vec::new();

        let counted = self.violations().count() as u32;
        if counted != self.total_violations {
            issues.push(IntegrityIssue::ViolationCount {
                reported: self.total_violations,
                counted,
            });
        }

        let summed: f64 = self.violations().map(|c| c.amount_owed).sum();
        if (summed - self.total_amount_owed).abs() > AMOUNT_TOLERANCE {
            issues.push(IntegrityIssue::AmountOwed {
                reported: self.total_amount_owed,
                summed,
            });
        }
        issues
    }
}

/// Read-only view of a result for display.
#[derive(Debug, Clone)]
pub struct TestReport<'a> {
    pub result: &'a TestResult,
    pub issues: Vec<IntegrityIssue>,
}

impl<'a> TestReport<'a> {
    pub fn new(result: &'a TestResult) -> Self {
        let issues = result.integrity_issues();
        for issue in &issues {
            warn!(rule_id = %result.rule_id, ?issue, "test result totals disagree with check results");
        }
        Self { result, issues }
    }

    pub fn total_violations(&self) -> u32 {
        self.result.total_violations
    }

    pub fn total_amount_owed(&self) -> f64 {
        self.result.total_amount_owed
    }

    pub fn has_integrity_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Identifies one outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    generation: u64,
    context: Option<String>,
}

impl RequestToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

/// What happened to a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The response is now the displayed result.
    Applied,
    /// The context changed while the request was in flight.
    Stale,
    /// The token was already completed.
    Duplicate,
}

#[derive(Debug, Default)]
struct InFlight {
    next_generation: u64,
    pending: BTreeSet<u64>,
    context: Option<String>,
}

impl InFlight {
    fn issue(&mut self) -> RequestToken {
        self.next_generation += 1;
        self.pending.insert(self.next_generation);
        RequestToken {
            generation: self.next_generation,
            context: self.context.clone(),
        }
    }

    fn settle(&mut self, token: &RequestToken) -> Completion {
        if !self.pending.remove(&token.generation) {
            return Completion::Duplicate;
        }
        if token.context != self.context {
            return Completion::Stale;
        }
        Completion::Applied
    }

    fn set_context(&mut self, context: Option<&str>) -> bool {
        if self.context.as_deref() == context {
            return false;
        }
        self.context = context.map(str::to_string);
        true
    }

    fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// The rule-shaped input of a test: a persisted rule or a draft.
#[derive(Debug, Clone, Copy)]
pub struct TestSubject<'a> {
    pub rule_id: &'a str,
    pub name: &'a str,
    pub checks: &'a [Check],
}

impl<'a> From<&'a Rule> for TestSubject<'a> {
    fn from(rule: &'a Rule) -> Self {
        Self {
            rule_id: &rule.rule_id,
            name: &rule.name,
            checks: &rule.checks,
        }
    }
}

impl<'a> From<&'a RuleDraft> for TestSubject<'a> {
    fn from(draft: &'a RuleDraft) -> Self {
        Self {
            rule_id: &draft.rule_id,
            name: &draft.name,
            checks: draft.checks(),
        }
    }
}

/// A test that has been issued but not completed.
#[derive(Debug, Clone)]
pub struct PendingTest {
    pub token: RequestToken,
    pub payload: TestPayload,
}

/// Runs rules against form data and holds the displayed result.
#[derive(Debug, Default)]
pub struct TestRunner {
    flight: InFlight,
    result: Option<TestResult>,
    error: Option<String>,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the evaluator payload. Excluded sections are sent as `{}`.
    pub fn build_payload(
        subject: TestSubject<'_>,
        form: &DynamicFormData,
        include: &IncludeSections,
    ) -> Result<TestPayload> {
        if subject.checks.is_empty() {
            return Err(StudioError::validation(
                "checks",
                "Add at least one check before testing",
            ));
        }

        let checks = subject
            .checks
            .iter()
            .enumerate()
            .map(|(i, check)| PayloadCheck {
                id: format!("check_{}", i + 1),
                condition: check.condition.clone(),
                amount_owed: check.amount_owed.clone(),
                violation_message: check.violation_message.clone(),
            })
            .collect();

        Ok(TestPayload {
            rule_id: subject.rule_id.to_string(),
            name: subject.name.to_string(),
            checks,
            payslip: form.payload_section(Section::Payslip, include),
            attendance: form.payload_section(Section::Attendance, include),
            contract: form.payload_section(Section::Contract, include),
        })
    }

    /// Switch the active context. A change clears the displayed result and
    /// makes every outstanding request stale.
    pub fn set_context(&mut self, rule_id: Option<&str>) {
        if self.flight.set_context(rule_id) {
            debug!(context = ?rule_id, "test context changed");
            self.result = None;
            self.error = None;
        }
    }

    /// Validate and issue a request. Nothing is sent yet.
    pub fn begin(
        &mut self,
        subject: TestSubject<'_>,
        form: &DynamicFormData,
        include: &IncludeSections,
    ) -> Result<PendingTest> {
        let payload = match Self::build_payload(subject, form, include) {
            Ok(payload) => payload,
            Err(e) => {
                self.error = Some(e.user_message());
                return Err(e);
            }
        };
        self.error = None;
        // The token carries the rule under test; testing another rule makes
        // it the active one and strands anything still in flight.
        self.set_context(Some(subject.rule_id).filter(|id| !id.is_empty()));
        let token = self.flight.issue();
        debug!(generation = token.generation, rule_id = %payload.rule_id, "test issued");
        Ok(PendingTest { token, payload })
    }

    /// Send a payload. Failures are folded into the result.
    pub async fn execute<B: Backend + ?Sized>(backend: &B, payload: &TestPayload) -> TestResult {
        match backend.test_rule(payload).await {
            Ok(result) => result,
            Err(e) => {
                warn!(rule_id = %payload.rule_id, error = %e, "rule test failed");
                TestResult::failure(e.user_message())
            }
        }
    }

    pub fn complete(&mut self, token: &RequestToken, result: TestResult) -> Completion {
        let completion = self.flight.settle(token);
        match completion {
            Completion::Applied => {
                info!(
                    generation = token.generation,
                    violations = result.total_violations,
                    failed = result.is_failure(),
                    "test result applied"
                );
                self.result = Some(result);
            }
            Completion::Stale => {
                debug!(generation = token.generation, "discarding stale test result");
            }
            Completion::Duplicate => {
                debug!(generation = token.generation, "test already completed");
            }
        }
        completion
    }

    /// Issue, send and complete in one call.
    pub async fn run<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        subject: TestSubject<'_>,
        form: &DynamicFormData,
        include: &IncludeSections,
    ) -> Result<Completion> {
        let pending = self.begin(subject, form, include)?;
        let result = Self::execute(backend, &pending.payload).await;
        Ok(self.complete(&pending.token, result))
    }

    pub fn is_testing(&self) -> bool {
        self.flight.is_pending()
    }

    pub fn result(&self) -> Option<&TestResult> {
        self.result.as_ref()
    }

    pub fn report(&self) -> Option<TestReport<'_>> {
        self.result.as_ref().map(TestReport::new)
    }

    /// Local error from the last `begin`, e.g. a rule without checks.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// How the evaluator should interpret a free-standing expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionType {
    Condition,
    Calculation,
}

/// Body of `POST /test-expression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRequest {
    pub expression: String,
    pub expression_type: ExpressionType,
    pub payslip: FieldMap,
    pub attendance: FieldMap,
    pub contract: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee: Option<FieldMap>,
}

/// Evaluator answer for an expression: a value or an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExpressionResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingExpression {
    pub token: RequestToken,
    pub request: ExpressionRequest,
}

/// Ad-hoc evaluation of a single condition or calculation.
#[derive(Debug, Default)]
pub struct ExpressionTester {
    flight: InFlight,
    result: Option<ExpressionResult>,
}

impl ExpressionTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_request(
        expression: &str,
        expression_type: ExpressionType,
        form: &DynamicFormData,
        include: &IncludeSections,
    ) -> Result<ExpressionRequest> {
        if expression.trim().is_empty() {
            return Err(StudioError::validation(
                "expression",
                "Enter an expression to test",
            ));
        }
        let employee = form.section(Section::Employee);
        Ok(ExpressionRequest {
            expression: expression.trim().to_string(),
            expression_type,
            payslip: form.payload_section(Section::Payslip, include),
            attendance: form.payload_section(Section::Attendance, include),
            contract: form.payload_section(Section::Contract, include),
            employee: (!employee.is_empty()).then(|| employee.clone()),
        })
    }

    pub fn set_context(&mut self, context: Option<&str>) {
        if self.flight.set_context(context) {
            self.result = None;
        }
    }

    pub fn begin(
        &mut self,
        expression: &str,
        expression_type: ExpressionType,
        form: &DynamicFormData,
        include: &IncludeSections,
    ) -> Result<PendingExpression> {
        let request = Self::build_request(expression, expression_type, form, include)?;
        let token = self.flight.issue();
        Ok(PendingExpression { token, request })
    }

    pub async fn execute<B: Backend + ?Sized>(
        backend: &B,
        request: &ExpressionRequest,
    ) -> ExpressionResult {
        match backend.test_expression(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "expression test failed");
                ExpressionResult::failure(e.user_message())
            }
        }
    }

    pub fn complete(&mut self, token: &RequestToken, result: ExpressionResult) -> Completion {
        let completion = self.flight.settle(token);
        if completion == Completion::Applied {
            self.result = Some(result);
        }
        completion
    }

    pub async fn run<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        expression: &str,
        expression_type: ExpressionType,
        form: &DynamicFormData,
        include: &IncludeSections,
    ) -> Result<Completion> {
        let pending = self.begin(expression, expression_type, form, include)?;
        let result = Self::execute(backend, &pending.request).await;
        Ok(self.complete(&pending.token, result))
    }

    pub fn is_testing(&self) -> bool {
        self.flight.is_pending()
    }

    pub fn result(&self) -> Option<&ExpressionResult> {
        self.result.as_ref()
    }
}
