//! The rule being authored, with its check list and scratch editor.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::check::{Check, CheckEditor, CommitOutcome};
use crate::client::Backend;
use crate::error::{Result, StudioError};
use crate::rule::{Rule, RuleInput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftMode {
    Create,
    /// Editing a persisted rule. The original id addresses the stored rule
    /// even if `rule_id` is being changed.
    Edit { original_rule_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleDraft {
    pub rule_id: String,
    pub name: String,
    pub law_reference: String,
    pub description: String,
    pub effective_from: String,
    pub effective_to: Option<String>,
    pub editor: CheckEditor,
    checks: Vec<Check>,
    penalty: Vec<String>,
    mode: DraftMode,
}

impl RuleDraft {
    /// An empty draft for a new rule.
    pub fn start_create() -> Self {
        Self {
            rule_id: String::new(),
            name: String::new(),
            law_reference: String::new(),
            description: String::new(),
            effective_from: String::new(),
            effective_to: None,
            editor: CheckEditor::new(),
            checks: Vec::new(),
            penalty: Vec::new(),
            mode: DraftMode::Create,
        }
    }

    /// A draft initialised from a copy of `rule`; the rule itself is never
    /// touched by later edits.
    pub fn start_edit(rule: &Rule) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            name: rule.name.clone(),
            law_reference: rule.law_reference.clone(),
            description: rule.description.clone(),
            effective_from: rule.effective_from.clone(),
            effective_to: rule
                .effective_to
                .clone()
                .filter(|d| !d.trim().is_empty()),
            editor: CheckEditor::new(),
            checks: rule.checks.clone(),
            penalty: rule.penalty.clone(),
            mode: DraftMode::Edit {
                original_rule_id: rule.rule_id.clone(),
            },
        }
    }

    pub fn mode(&self) -> &DraftMode {
        &self.mode
    }

    pub fn original_rule_id(&self) -> Option<&str> {
        match &self.mode {
            DraftMode::Create => None,
            DraftMode::Edit { original_rule_id } => Some(original_rule_id),
        }
    }

    /// The id was changed while editing.
    pub fn is_renaming(&self) -> bool {
        self.original_rule_id()
            .is_some_and(|original| original != self.rule_id.trim())
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn commit_check(&mut self) -> CommitOutcome {
        self.editor.commit(&mut self.checks)
    }

    pub fn edit_check(&mut self, index: usize) -> bool {
        self.editor.edit(&self.checks, index)
    }

    pub fn cancel_check_edit(&mut self) {
        self.editor.cancel();
    }

    pub fn remove_check(&mut self, index: usize) -> Option<Check> {
        self.editor.remove(&mut self.checks, index)
    }

    /// Check everything the backend requires before submitting.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.mode, DraftMode::Edit { .. }) && self.rule_id.trim().is_empty() {
            return Err(StudioError::validation("rule_id", "Rule ID is required"));
        }
        required("name", &self.name, "Rule name is required")?;
        required(
            "law_reference",
            &self.law_reference,
            "Law reference is required",
        )?;
        required("description", &self.description, "Description is required")?;
        required(
            "effective_from",
            &self.effective_from,
            "Effective from date is required",
        )?;

        let from = parse_date("effective_from", &self.effective_from)?;
        if let Some(to) = self.effective_to.as_deref().filter(|d| !d.trim().is_empty()) {
            let to = parse_date("effective_to", to)?;
            if to < from {
                warn!(%from, %to, "effective_to is before effective_from");
            }
        }

        if self.checks.is_empty() {
            return Err(StudioError::validation(
                "checks",
                "At least one check is required",
            ));
        }
        if let Some(index) = self.checks.iter().position(|c| !c.is_complete()) {
            return Err(StudioError::validation(
                format!("checks[{index}]"),
                format!(
                    "Check {} needs a condition, an amount owed formula and a violation message",
                    index + 1
                ),
            ));
        }
        Ok(())
    }

    /// Request body for create/update.
    pub fn to_input(&self) -> RuleInput {
        let rule_id = match self.mode {
            DraftMode::Create => String::new(),
            DraftMode::Edit { .. } => self.rule_id.trim().to_string(),
        };
        RuleInput {
            rule_id,
            name: self.name.trim().to_string(),
            law_reference: self.law_reference.trim().to_string(),
            description: self.description.trim().to_string(),
            effective_from: self.effective_from.trim().to_string(),
            effective_to: self
                .effective_to
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            checks: self.checks.clone(),
            penalty: self.penalty.clone(),
        }
    }

    /// Ask the backend to draft checks from the description.
    ///
    /// On success the whole list is replaced; on failure it is untouched.
    pub async fn generate_checks<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<usize> {
        if self.description.trim().is_empty() {
            return Err(StudioError::validation(
                "description",
                "Enter a rule description before generating checks",
            ));
        }
        let generated = backend.generate_checks(self.description.trim()).await?;
        info!(count = generated.len(), "generated checks from description");
        self.editor.cancel();
        self.checks = generated;
        Ok(self.checks.len())
    }
}

fn required(field: &str, value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StudioError::validation(field, message));
    }
    Ok(())
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        StudioError::validation(
            field,
            format!("Invalid date '{value}': expected YYYY-MM-DD"),
        )
    })
}
