//! Command-line interface for testing a rule against payroll data.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use console::style;
use tracing::debug;

use crate::client::{Backend, HttpBackend};
use crate::config::BackendConfig;
use crate::error::{Result, StudioError};
use crate::form::{DynamicFormData, IncludeSections};
use crate::rule::{Rule, RuleInput};
use crate::tester::{IntegrityIssue, TestReport, TestRunner};
use crate::types::Section;

/// WageWatch rule tester - run a labor-law rule against sample payroll data.
#[derive(Debug, Parser)]
#[command(name = "wagewatch-test-rule")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Id of a stored rule to fetch and test
    #[arg(long, required_unless_present = "rule", conflicts_with = "rule")]
    pub rule_id: Option<String>,

    /// JSON file holding a rule or an unsaved draft
    #[arg(long)]
    pub rule: Option<PathBuf>,

    /// JSON file with payslip, attendance and contract data (default: built-in sample)
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Section to send as empty (payslip, attendance or contract); may be repeated
    #[arg(long, value_parser = parse_rule_section)]
    pub exclude: Vec<Section>,

    /// Print the raw result JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

fn parse_rule_section(value: &str) -> std::result::Result<Section, String> {
    match Section::from_str(value) {
        Ok(section) if Section::RULE_SECTIONS.contains(&section) => Ok(section),
        _ => Err(format!(
            "'{value}' is not a rule test section (payslip, attendance, contract)"
        )),
    }
}

/// Run the CLI. Returns `false` when the evaluator reported an error.
pub async fn run() -> Result<bool> {
    let cli = Cli::parse();
    let config = BackendConfig::from_env()?;
    let backend = HttpBackend::new(&config)?;
    test_command(&backend, &cli).await
}

async fn test_command<B: Backend + ?Sized>(backend: &B, cli: &Cli) -> Result<bool> {
    let rule = match (&cli.rule, &cli.rule_id) {
        (Some(path), _) => load_rule(path)?,
        (None, Some(rule_id)) => backend.get_rule(rule_id).await?,
        (None, None) => {
            return Err(StudioError::validation(
                "rule",
                "Pass --rule <FILE> or --rule-id <ID>",
            ))
        }
    };
    let form = load_form(cli.data.as_deref())?;

    let mut include = IncludeSections::default();
    for section in &cli.exclude {
        include.set(*section, false);
    }

    let mut runner = TestRunner::new();
    runner.run(backend, (&rule).into(), &form, &include).await?;

    let Some(report) = runner.report() else {
        return Err(StudioError::ResponseParse(
            "no test result was recorded".to_string(),
        ));
    };

    if cli.json {
        let text = serde_json::to_string_pretty(report.result)
            .map_err(|e| StudioError::ResponseParse(e.to_string()))?;
        println!("{text}");
    } else {
        print_summary(&rule, &report);
    }
    Ok(!report.result.is_failure())
}

/// Read a rule file. Both stored rules and drafts without an id parse.
fn load_rule(path: &Path) -> Result<Rule> {
    let text = std::fs::read_to_string(path)?;
    let input: RuleInput = serde_json::from_str(&text).map_err(|e| {
        StudioError::validation("rule", format!("{}: {e}", path.display()))
    })?;
    debug!(path = %path.display(), checks = input.checks.len(), "loaded rule file");
    let rule_id = input.rule_id.clone();
    Ok(input.into_rule(rule_id))
}

fn load_form(path: Option<&Path>) -> Result<DynamicFormData> {
    let mut form = DynamicFormData::sample();
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)?;
        if !form.load_from_json(&text) {
            return Err(StudioError::validation(
                "data",
                format!("{} is not a JSON object", path.display()),
            ));
        }
    }
    Ok(form)
}

fn print_summary(rule: &Rule, report: &TestReport<'_>) {
    let result = report.result;
    let label = if rule.rule_id.is_empty() {
        "(unsaved)"
    } else {
        rule.rule_id.as_str()
    };
    println!("{} {} {}", style("Rule").bold(), style(label).cyan(), rule.name);

    if let Some(error) = &result.error {
        println!("  {} {}", style("Error:").red().bold(), error);
        return;
    }

    let violations = style(report.total_violations());
    let violations = if report.total_violations() > 0 {
        violations.red().bold()
    } else {
        violations.green()
    };
    println!("  Violations: {violations}");
    println!("  Amount owed: {:.2}", report.total_amount_owed());
    println!();

    for check in &result.check_results {
        if check.condition_result {
            println!(
                "  {} {} {} (owed {:.2})",
                style("✗").red(),
                check.check_id,
                check.violation_message,
                check.amount_owed
            );
        } else {
            println!("  {} {}", style("✓").green(), check.check_id);
        }
        if !check.missing_fields.is_empty() {
            println!(
                "      missing fields: {}",
                style(check.missing_fields.join(", ")).yellow()
            );
        }
        for error in [&check.condition_error, &check.amount_error]
            .into_iter()
            .flatten()
        {
            println!("      {}", style(error).yellow());
        }
    }

    for issue in &report.issues {
        let text = match issue {
            IntegrityIssue::ViolationCount { reported, counted } => {
                format!("reported {reported} violations but {counted} checks fired")
            }
            IntegrityIssue::AmountOwed { reported, summed } => {
                format!("reported {reported:.2} owed but checks sum to {summed:.2}")
            }
        };
        println!("  {} {}", style("Warning:").yellow().bold(), text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::MockBackend;
    use crate::tester::{CheckResult, TestResult};
    use crate::types::FieldValue;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_requires_a_rule_source() {
        assert!(Cli::try_parse_from(["wagewatch-test-rule"]).is_err());
        assert!(Cli::try_parse_from([
            "wagewatch-test-rule",
            "--rule-id",
            "a",
            "--rule",
            "b.json"
        ])
        .is_err());
    }

    #[test]
    fn test_exclude_sections() {
        let cli = Cli::try_parse_from([
            "wagewatch-test-rule",
            "--rule-id",
            "min_wage",
            "--exclude",
            "payslip",
            "--exclude",
            "contract",
        ])
        .unwrap();
        assert_eq!(cli.exclude, vec![Section::Payslip, Section::Contract]);

        assert!(Cli::try_parse_from([
            "wagewatch-test-rule",
            "--rule-id",
            "min_wage",
            "--exclude",
            "employee",
        ])
        .is_err());
    }

    #[test]
    fn test_load_draft_rule_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "name": "Overtime",
                "law_reference": "Hours of Work and Rest Law",
                "description": "Overtime is paid at 125%",
                "effective_from": "2024-01-01",
                "checks": [{{
                    "condition": "attendance.overtime_hours > 0",
                    "amount_owed": "0",
                    "violation_message": "Overtime"
                }}]
            }}"#
        )
        .unwrap();

        let rule = load_rule(file.path()).unwrap();
        assert_eq!(rule.rule_id, "");
        assert_eq!(rule.checks.len(), 1);
    }

    #[test]
    fn test_load_form_rejects_non_object() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        assert!(load_form(Some(file.path())).is_err());

        let form = load_form(None).unwrap();
        assert_eq!(
            form.get(Section::Attendance, "overtime_hours"),
            Some(&FieldValue::Integer(5))
        );
    }

    #[tokio::test]
    async fn test_command_fetches_rule_and_excludes_sections() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "rule_id": "overtime_125",
            "name": "Overtime 125%",
            "checks": [{
                "condition": "attendance.overtime_hours > 0",
                "amount_owed": "0",
                "violation_message": "Overtime"
            }]
        }))
        .unwrap();
        let backend = MockBackend::with_rules(vec![rule]);
        backend.state().test_result = Some(TestResult {
            success: true,
            rule_id: "overtime_125".into(),
            total_violations: 1,
            check_results: vec![CheckResult {
                check_id: "check_1".into(),
                condition_result: true,
                ..Default::default()
            }],
            ..Default::default()
        });
        let cli = Cli::try_parse_from([
            "wagewatch-test-rule",
            "--rule-id",
            "overtime_125",
            "--exclude",
            "payslip",
        ])
        .unwrap();

        assert!(test_command(&backend, &cli).await.unwrap());
        let payload = backend.state().last_test_payload.clone().unwrap();
        assert!(payload.payslip.is_empty());
        assert_eq!(payload.checks[0].id, "check_1");
        assert_eq!(
            payload.attendance.get("overtime_hours"),
            Some(&FieldValue::Integer(5))
        );
    }

    #[tokio::test]
    async fn test_command_reports_failed_test() {
        let backend = MockBackend::with_rules(vec![serde_json::from_value(serde_json::json!({
            "rule_id": "r",
            "name": "R",
            "checks": [{"condition": "x", "amount_owed": "0", "violation_message": "m"}]
        }))
        .unwrap()]);
        let cli = Cli::try_parse_from(["wagewatch-test-rule", "--rule-id", "r"]).unwrap();
        backend.state().test_result = Some(TestResult::failure("Unknown field 'x'"));

        assert!(!test_command(&backend, &cli).await.unwrap());
    }
}
