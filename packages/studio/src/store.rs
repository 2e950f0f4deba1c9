//! Persisted rules and the CRUD workflow against the backend.

use tracing::{info, warn};

use crate::client::Backend;
use crate::draft::{DraftMode, RuleDraft};
use crate::error::{Result, StudioError};
use crate::rule::Rule;

/// In-memory copy of the backend's rules plus the UI state around them.
///
/// Validation errors are reported per field and never reach the error
/// banner; a 401 on listing switches to the unauthorized state instead.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: Vec<Rule>,
    selected: Option<String>,
    loading: bool,
    error: Option<String>,
    field_error: Option<(String, String)>,
    unauthorized: bool,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn find(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    pub fn selected(&self) -> Option<&Rule> {
        self.selected.as_deref().and_then(|id| self.find(id))
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Select a known rule, or clear the selection with `None`.
    pub fn select(&mut self, rule_id: Option<&str>) -> bool {
        match rule_id {
            Some(id) if self.find(id).is_some() => {
                self.selected = Some(id.to_string());
                true
            }
            Some(_) => false,
            None => {
                self.selected = None;
                true
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Persistent error banner text.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Field name and message of the last local validation failure.
    pub fn field_error(&self) -> Option<(&str, &str)> {
        self.field_error
            .as_ref()
            .map(|(field, message)| (field.as_str(), message.as_str()))
    }

    pub fn is_unauthorized(&self) -> bool {
        self.unauthorized
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Fetch all rules.
    pub async fn list<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        self.begin();
        self.unauthorized = false;
        let result = backend.list_rules().await;
        let rules = self.finish("list", result)?;

        info!(count = rules.len(), "loaded rules");
        self.rules = rules;
        if self.selected.as_deref().is_some_and(|id| self.find(id).is_none()) {
            self.selected = None;
        }
        Ok(())
    }

    /// Re-fetch one rule and replace the local copy.
    pub async fn get<B: Backend + ?Sized>(&mut self, backend: &B, rule_id: &str) -> Result<&Rule> {
        self.begin();
        let result = backend.get_rule(rule_id).await;
        let rule = self.finish("get", result)?;

        let index = match self.rules.iter().position(|r| r.rule_id == rule_id) {
            Some(index) => {
                self.rules[index] = rule;
                index
            }
            None => {
                self.rules.push(rule);
                self.rules.len() - 1
            }
        };
        Ok(&self.rules[index])
    }

    /// Submit a draft, creating or updating according to its mode.
    pub async fn submit<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        draft: &RuleDraft,
    ) -> Result<Rule> {
        match draft.mode() {
            DraftMode::Create => self.create(backend, draft).await,
            DraftMode::Edit { .. } => self.update(backend, draft).await,
        }
    }

    /// Create a rule. The backend assigns its id; the new rule is selected.
    pub async fn create<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        draft: &RuleDraft,
    ) -> Result<Rule> {
        self.validate(draft)?;

        self.begin();
        let result = backend.create_rule(&draft.to_input()).await;
        let created = self.finish("create", result)?;

        info!(rule_id = %created.rule_id, "rule created");
        self.rules.push(created.clone());
        self.selected = Some(created.rule_id.clone());
        Ok(created)
    }

    /// Update an existing rule, replacing the entry found under its
    /// original id with the server's answer.
    pub async fn update<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        draft: &RuleDraft,
    ) -> Result<Rule> {
        let Some(original_id) = draft.original_rule_id().map(str::to_string) else {
            return Err(self.reject(StudioError::validation(
                "rule_id",
                "Only a rule opened for editing can be updated",
            )));
        };
        self.validate(draft)?;

        if draft.is_renaming() {
            let new_id = draft.rule_id.trim();
            let taken = self
                .rules
                .iter()
                .any(|r| r.rule_id != original_id && r.rule_id == new_id);
            if taken {
                return Err(self.reject(StudioError::validation(
                    "rule_id",
                    format!("Rule ID '{new_id}' is already used by another rule"),
                )));
            }
        }

        self.begin();
        let result = backend.update_rule(&original_id, &draft.to_input()).await;
        let updated = self.finish("update", result)?;

        info!(rule_id = %updated.rule_id, original = %original_id, "rule updated");
        match self.rules.iter_mut().find(|r| r.rule_id == original_id) {
            Some(slot) => *slot = updated.clone(),
            None => self.rules.push(updated.clone()),
        }
        if self.selected.as_deref() == Some(original_id.as_str()) {
            self.selected = Some(updated.rule_id.clone());
        }
        Ok(updated)
    }

    /// Delete a rule after `confirm` approves it.
    ///
    /// Returns `Ok(false)` when the user declined; nothing is sent then.
    pub async fn delete<B, F>(&mut self, backend: &B, rule_id: &str, confirm: F) -> Result<bool>
    where
        B: Backend + ?Sized,
        F: FnOnce(&str) -> bool,
    {
        if !confirm(rule_id) {
            return Ok(false);
        }

        self.begin();
        let result = backend.delete_rule(rule_id).await;
        self.finish("delete", result)?;

        info!(rule_id, "rule deleted");
        self.rules.retain(|r| r.rule_id != rule_id);
        if self.selected.as_deref() == Some(rule_id) {
            self.selected = None;
        }
        Ok(true)
    }

    fn validate(&mut self, draft: &RuleDraft) -> Result<()> {
        draft.validate().map_err(|e| self.reject(e))
    }

    fn reject(&mut self, error: StudioError) -> StudioError {
        if let StudioError::Validation { field, message } = &error {
            self.field_error = Some((field.clone(), message.clone()));
        }
        error
    }

    fn begin(&mut self) {
        self.loading = true;
        self.error = None;
        self.field_error = None;
    }

    /// Shared completion path for every backend call: the loading flag is
    /// released whatever the outcome.
    fn finish<T>(&mut self, operation: &str, result: Result<T>) -> Result<T> {
        self.loading = false;
        result.map_err(|e| {
            warn!(operation, error = %e, "rule operation failed");
            match &e {
                StudioError::Unauthorized if operation == "list" => self.unauthorized = true,
                _ => self.error = Some(e.user_message()),
            }
            e
        })
    }
}
