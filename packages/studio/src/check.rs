//! Checks and the scratch editor used to add or edit them.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A condition/formula triplet interpreted by the backend evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub condition: String,
    pub amount_owed: String,
    pub violation_message: String,
}

impl Check {
    pub fn new(
        condition: impl Into<String>,
        amount_owed: impl Into<String>,
        violation_message: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            amount_owed: amount_owed.into(),
            violation_message: violation_message.into(),
        }
    }

    /// Every field has content. Incomplete checks block submission.
    pub fn is_complete(&self) -> bool {
        !self.condition.trim().is_empty()
            && !self.amount_owed.trim().is_empty()
            && !self.violation_message.trim().is_empty()
    }

    /// No field has content.
    pub fn is_blank(&self) -> bool {
        self.condition.trim().is_empty()
            && self.amount_owed.trim().is_empty()
            && self.violation_message.trim().is_empty()
    }
}

/// What a call to [`CheckEditor::commit`] did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Appended(usize),
    Replaced(usize),
    /// The editor was blank; nothing changed.
    Ignored,
}

/// Scratch check plus the index being edited, if any.
///
/// With no index the editor is in append mode; with an index, committing
/// overwrites that entry in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckEditor {
    pub scratch: Check,
    editing: Option<usize>,
}

impl CheckEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn editing_index(&self) -> Option<usize> {
        self.editing
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    /// Load check `index` into the editor. Returns false when out of range.
    pub fn edit(&mut self, checks: &[Check], index: usize) -> bool {
        match checks.get(index) {
            Some(check) => {
                self.scratch = check.clone();
                self.editing = Some(index);
                true
            }
            None => false,
        }
    }

    /// Leave replace mode without touching the list.
    pub fn cancel(&mut self) {
        self.scratch = Check::default();
        self.editing = None;
    }

    pub fn commit(&mut self, checks: &mut Vec<Check>) -> CommitOutcome {
        if self.scratch.is_blank() {
            return CommitOutcome::Ignored;
        }

        let check = std::mem::take(&mut self.scratch);
        let outcome = match self.editing.take() {
            Some(index) if index < checks.len() => {
                checks[index] = check;
                CommitOutcome::Replaced(index)
            }
            _ => {
                checks.push(check);
                CommitOutcome::Appended(checks.len() - 1)
            }
        };
        debug!(?outcome, total = checks.len(), "committed check");
        outcome
    }

    /// Remove check `index`, keeping the edited position pointing at the
    /// same check. Returns the removed check.
    pub fn remove(&mut self, checks: &mut Vec<Check>, index: usize) -> Option<Check> {
        if index >= checks.len() {
            return None;
        }
        let removed = checks.remove(index);
        match self.editing {
            Some(editing) if editing == index => self.cancel(),
            Some(editing) if editing > index => self.editing = Some(editing - 1),
            _ => {}
        }
        Some(removed)
    }
}
