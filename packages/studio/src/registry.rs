//! Registry of dynamic parameters, the schema behind every dynamic form.

use tracing::{info, warn};

use crate::client::Backend;
use crate::config::IDENTITY_PARAMS;
use crate::error::{Result, StudioError};
use crate::form::DynamicFormData;
use crate::notice::Notice;
use crate::types::{DynamicParameter, NewParameter, ParameterSchema, ParameterUpdate, Section};

/// Owns the parameter schema and the admin actions on it.
///
/// Every mutation, successful or not, raises a [`Notice`] and clears the
/// pending removal selection.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    schema: ParameterSchema,
    notice: Option<Notice>,
    pending_removal: Option<(Section, String)>,
    loading: bool,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn section(&self, section: Section) -> &[DynamicParameter] {
        self.schema.section(section)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// The current notice, unless it has timed out.
    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref().filter(|n| !n.is_expired())
    }

    pub fn pending_removal(&self) -> Option<(Section, &str)> {
        self.pending_removal
            .as_ref()
            .map(|(section, param)| (*section, param.as_str()))
    }

    /// Reload the whole schema.
    ///
    /// On failure the previously loaded (initially empty) sections stay in
    /// place so forms remain usable.
    pub async fn refresh<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        self.loading = true;
        let result = backend.list_parameters().await;
        self.loading = false;

        match result {
            Ok(schema) => {
                info!(
                    payslip = schema.payslip.len(),
                    attendance = schema.attendance.len(),
                    contract = schema.contract.len(),
                    "loaded dynamic parameters"
                );
                self.schema = schema;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to load dynamic parameters");
                self.notice = Some(Notice::error(e.user_message()));
                Err(e)
            }
        }
    }

    /// Create a parameter, reload the schema and seed the form with `0`.
    pub async fn add<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        form: &mut DynamicFormData,
        section: Section,
        param: NewParameter,
    ) -> Result<DynamicParameter> {
        self.pending_removal = None;
        if let Err(e) = param.validate() {
            return Err(self.fail(e));
        }

        self.loading = true;
        let created = backend.add_parameter(section, &param).await;
        self.loading = false;
        let created = created.map_err(|e| self.fail(e))?;

        // The parameter exists now; a failed reload is reported but does
        // not undo the add.
        if let Err(e) = self.refresh(backend).await {
            warn!(error = %e, "reload after add failed");
        }
        form.seed_parameter(section, &created.param);

        info!(%section, param = %created.param, "parameter added");
        self.notice = Some(Notice::success(format!(
            "Parameter '{}' added to {section}",
            created.param
        )));
        Ok(created)
    }

    /// Change the labels and description. The key and type are fixed.
    pub async fn update<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        section: Section,
        param: &str,
        update: ParameterUpdate,
    ) -> Result<DynamicParameter> {
        self.pending_removal = None;
        if let Err(e) = update.validate() {
            return Err(self.fail(e));
        }

        self.loading = true;
        let updated = backend.update_parameter(section, param, &update).await;
        self.loading = false;
        let updated = updated.map_err(|e| self.fail(e))?;

        if let Err(e) = self.refresh(backend).await {
            warn!(error = %e, "reload after update failed");
        }
        self.notice = Some(Notice::success(format!("Parameter '{param}' updated")));
        Ok(updated)
    }

    /// Mark a parameter for removal, pending confirmation.
    pub fn select_for_removal(&mut self, section: Section, param: &str) -> Result<()> {
        check_removable(param)?;
        self.pending_removal = Some((section, param.to_string()));
        Ok(())
    }

    pub fn cancel_removal(&mut self) {
        self.pending_removal = None;
    }

    /// Delete a parameter and drop it from the form.
    ///
    /// `employee_id` and `month` are refused before any request is made.
    pub async fn remove<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        form: &mut DynamicFormData,
        section: Section,
        param: &str,
    ) -> Result<()> {
        self.pending_removal = None;
        if let Err(e) = check_removable(param) {
            return Err(self.fail(e));
        }

        self.loading = true;
        let removed = backend.remove_parameter(section, param).await;
        self.loading = false;
        removed.map_err(|e| self.fail(e))?;

        form.remove_parameter(section, param);
        if let Err(e) = self.refresh(backend).await {
            warn!(error = %e, "reload after remove failed");
        }

        info!(%section, param, "parameter removed");
        self.notice = Some(Notice::success(format!(
            "Parameter '{param}' removed from {section}"
        )));
        Ok(())
    }

    fn fail(&mut self, error: StudioError) -> StudioError {
        warn!(error = %error, "parameter change failed");
        self.notice = Some(Notice::error(error.user_message()));
        error
    }
}

fn check_removable(param: &str) -> Result<()> {
    if IDENTITY_PARAMS.contains(&param) {
        return Err(StudioError::validation(
            param,
            format!("'{param}' is required in every section and cannot be removed"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::MockBackend;
    use crate::notice::NoticeKind;
    use crate::types::{FieldValue, ParamType};
    use pretty_assertions::assert_eq;

    fn bonus() -> NewParameter {
        NewParameter {
            param: "bonus".into(),
            label_en: "Bonus".into(),
            label_he: "בונוס".into(),
            description: "Monthly performance bonus".into(),
            param_type: "number".into(),
        }
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_usable_sections() {
        let backend = MockBackend::new();
        backend.fail_with(502, "bad gateway");
        let mut registry = ParameterRegistry::new();

        assert!(registry.refresh(&backend).await.is_err());
        assert!(registry.section(Section::Payslip).is_empty());
        assert!(!registry.is_loading());
        assert_eq!(registry.notice().unwrap().kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn test_add_refreshes_and_seeds_form() {
        let backend = MockBackend::new();
        let mut registry = ParameterRegistry::new();
        let mut form = DynamicFormData::sample();

        let created = registry
            .add(&backend, &mut form, Section::Payslip, bonus())
            .await
            .unwrap();

        assert_eq!(created.param_type, ParamType::Number);
        assert_eq!(
            backend.calls(),
            vec!["POST /dynamic-params/payslip", "GET /dynamic-params"]
        );
        assert_eq!(registry.section(Section::Payslip).len(), 1);
        assert_eq!(
            form.get(Section::Payslip, "bonus"),
            Some(&FieldValue::Integer(0))
        );
        assert_eq!(registry.notice().unwrap().kind, NoticeKind::Success);
    }

    #[tokio::test]
    async fn test_add_missing_field_is_local() {
        let backend = MockBackend::new();
        let mut registry = ParameterRegistry::new();
        let mut form = DynamicFormData::new();
        let mut param = bonus();
        param.description = "  ".into();

        let err = registry
            .add(&backend, &mut form, Section::Payslip, param)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(backend.call_count(), 0);
        assert_eq!(registry.notice().unwrap().kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn test_duplicate_add_surfaces_backend_message() {
        let backend = MockBackend::new();
        let mut registry = ParameterRegistry::new();
        let mut form = DynamicFormData::new();
        registry
            .add(&backend, &mut form, Section::Payslip, bonus())
            .await
            .unwrap();

        let err = registry
            .add(&backend, &mut form, Section::Payslip, bonus())
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "Parameter 'bonus' already exists in payslip"
        );
        assert_eq!(
            registry.notice().unwrap().message,
            "Parameter 'bonus' already exists in payslip"
        );
    }

    #[tokio::test]
    async fn test_identity_removal_rejected_without_request() {
        let backend = MockBackend::new();
        let mut registry = ParameterRegistry::new();
        let mut form = DynamicFormData::sample();

        for param in IDENTITY_PARAMS {
            let err = registry
                .remove(&backend, &mut form, Section::Payslip, param)
                .await
                .unwrap_err();
            assert!(err.is_validation());
            assert!(registry.select_for_removal(Section::Payslip, param).is_err());
        }
        assert_eq!(backend.call_count(), 0);
        assert!(form.get(Section::Payslip, "employee_id").is_some());
    }

    #[tokio::test]
    async fn test_remove_drops_form_value_and_selection() {
        let backend = MockBackend::new();
        let mut registry = ParameterRegistry::new();
        let mut form = DynamicFormData::sample();
        registry
            .add(&backend, &mut form, Section::Contract, bonus())
            .await
            .unwrap();

        registry
            .select_for_removal(Section::Contract, "bonus")
            .unwrap();
        assert_eq!(
            registry.pending_removal(),
            Some((Section::Contract, "bonus"))
        );

        registry
            .remove(&backend, &mut form, Section::Contract, "bonus")
            .await
            .unwrap();
        assert!(form.get(Section::Contract, "bonus").is_none());
        assert!(registry.section(Section::Contract).is_empty());
        assert_eq!(registry.pending_removal(), None);
    }

    #[tokio::test]
    async fn test_update_keeps_key_and_type() {
        let backend = MockBackend::new();
        let mut registry = ParameterRegistry::new();
        let mut form = DynamicFormData::new();
        registry
            .add(&backend, &mut form, Section::Attendance, bonus())
            .await
            .unwrap();

        let updated = registry
            .update(
                &backend,
                Section::Attendance,
                "bonus",
                ParameterUpdate {
                    label_en: "Attendance bonus".into(),
                    label_he: "בונוס נוכחות".into(),
                    description: "Bonus for full attendance".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.param, "bonus");
        assert_eq!(updated.param_type, ParamType::Number);
        assert_eq!(
            registry.section(Section::Attendance)[0].label_en,
            "Attendance bonus"
        );
    }
}
