//! Dynamic form state: the payroll data a rule is tested against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{IDENTITY_PARAMS, SAMPLE_EMPLOYEE_ID, SAMPLE_MONTH};
use crate::error::Result;
use crate::types::{FieldValue, ParameterSchema, Section};

/// Field name to value within one section.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Section-keyed record of form values.
///
/// All writes go through [`DynamicFormData::set_value`], which keeps the
/// identity fields consistent across sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicFormData {
    #[serde(default)]
    pub employee_id: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    payslip: FieldMap,
    #[serde(default)]
    attendance: FieldMap,
    #[serde(default)]
    contract: FieldMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    employee: FieldMap,
}

impl DynamicFormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical sample record.
    pub fn sample() -> Self {
        let mut form = Self::new();
        form.load_sample();
        form
    }

    pub fn section(&self, section: Section) -> &FieldMap {
        match section {
            Section::Payslip => &self.payslip,
            Section::Attendance => &self.attendance,
            Section::Contract => &self.contract,
            Section::Employee => &self.employee,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut FieldMap {
        match section {
            Section::Payslip => &mut self.payslip,
            Section::Attendance => &mut self.attendance,
            Section::Contract => &mut self.contract,
            Section::Employee => &mut self.employee,
        }
    }

    pub fn get(&self, section: Section, param: &str) -> Option<&FieldValue> {
        self.section(section).get(param)
    }

    /// Write one field.
    ///
    /// `employee_id` and `month` written through the payslip section are
    /// copied to attendance, contract and the top-level identity in the
    /// same call.
    pub fn set_value(&mut self, section: Section, param: &str, value: FieldValue) {
        let mirrored = section == Section::Payslip && IDENTITY_PARAMS.contains(&param);

        if mirrored {
            for target in [Section::Attendance, Section::Contract] {
                self.section_mut(target)
                    .insert(param.to_string(), value.clone());
            }
            let text = match &value {
                FieldValue::Text(s) => s.clone(),
                FieldValue::Integer(i) => i.to_string(),
                FieldValue::Number(f) => f.to_string(),
                FieldValue::Bool(b) => b.to_string(),
            };
            if param == "employee_id" {
                self.employee_id = text;
            } else {
                self.month = text;
            }
        }

        self.section_mut(section).insert(param.to_string(), value);
    }

    /// Coerce raw input through the declared parameter type, then write it.
    ///
    /// Parameters the schema does not know are stored as text.
    pub fn set_input(
        &mut self,
        schema: &ParameterSchema,
        section: Section,
        param: &str,
        raw: &str,
    ) -> Result<()> {
        let value = match schema.find(section, param) {
            Some(def) => def.param_type.coerce(param, raw)?,
            None => FieldValue::Text(raw.to_string()),
        };
        self.set_value(section, param, value);
        Ok(())
    }

    /// Replace everything with the sample record.
    pub fn load_sample(&mut self) {
        let id = FieldValue::from(SAMPLE_EMPLOYEE_ID);
        let month = FieldValue::from(SAMPLE_MONTH);

        let payslip = [
            ("employee_id", id.clone()),
            ("month", month.clone()),
            ("base_salary", FieldValue::Number(5160.0)),
            ("hourly_rate", FieldValue::Number(30.0)),
            ("overtime_rate", FieldValue::Number(35.0)),
            ("overtime_hours", FieldValue::Integer(5)),
            ("overtime_pay", FieldValue::Number(175.0)),
            ("travel_allowance", FieldValue::Number(225.0)),
            ("gross_salary", FieldValue::Number(5560.0)),
            ("net_salary", FieldValue::Number(4620.0)),
        ];
        let attendance = [
            ("employee_id", id.clone()),
            ("month", month.clone()),
            ("work_days", FieldValue::Integer(22)),
            ("regular_hours", FieldValue::Integer(172)),
            ("overtime_hours", FieldValue::Integer(5)),
            ("sick_days", FieldValue::Integer(0)),
            ("vacation_days", FieldValue::Integer(1)),
        ];
        let contract = [
            ("employee_id", id),
            ("month", month),
            ("hourly_rate", FieldValue::Number(30.0)),
            ("monthly_salary", FieldValue::Number(5160.0)),
            ("standard_hours_per_month", FieldValue::Integer(172)),
            ("travel_allowance_per_day", FieldValue::Number(11.25)),
        ];

        *self = Self {
            employee_id: SAMPLE_EMPLOYEE_ID.to_string(),
            month: SAMPLE_MONTH.to_string(),
            payslip: to_map(&payslip),
            attendance: to_map(&attendance),
            contract: to_map(&contract),
            employee: FieldMap::new(),
        };
    }

    /// Merge a pasted JSON document into the form.
    ///
    /// Malformed input leaves the form untouched and returns `false`.
    pub fn load_from_json(&mut self, text: &str) -> bool {
        let doc: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "ignoring malformed form JSON");
                return false;
            }
        };
        let Some(obj) = doc.as_object() else {
            warn!("ignoring form JSON that is not an object");
            return false;
        };

        let employee_id = obj
            .get("employee_id")
            .and_then(FieldValue::from_json)
            .unwrap_or_else(|| FieldValue::from(SAMPLE_EMPLOYEE_ID));
        let month = obj
            .get("month")
            .and_then(FieldValue::from_json)
            .unwrap_or_else(|| FieldValue::from(SAMPLE_MONTH));
        self.set_value(Section::Payslip, "employee_id", employee_id);
        self.set_value(Section::Payslip, "month", month);

        for section in [
            Section::Payslip,
            Section::Attendance,
            Section::Contract,
            Section::Employee,
        ] {
            let key: &str = section.as_ref();
            let Some(fields) = obj.get(key).and_then(|v| v.as_object()) else {
                continue;
            };
            for (param, raw) in fields {
                match FieldValue::from_json(raw) {
                    Some(value) => self.set_value(section, param, value),
                    None => debug!(%section, param = %param, "skipping non-scalar form value"),
                }
            }
        }
        true
    }

    /// Add a newly created parameter with a zero default, keeping any
    /// value already present.
    pub fn seed_parameter(&mut self, section: Section, param: &str) {
        self.section_mut(section)
            .entry(param.to_string())
            .or_insert(FieldValue::Integer(0));
    }

    /// Drop a removed parameter so it is never sent again.
    pub fn remove_parameter(&mut self, section: Section, param: &str) {
        self.section_mut(section).remove(param);
    }

    /// Section contents for a payload, `{}` when the section is excluded.
    pub fn payload_section(&self, section: Section, include: &IncludeSections) -> FieldMap {
        if include.includes(section) {
            self.section(section).clone()
        } else {
            FieldMap::new()
        }
    }
}

fn to_map(entries: &[(&str, FieldValue)]) -> FieldMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Which sections contribute data to a test payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeSections {
    pub payslip: bool,
    pub attendance: bool,
    pub contract: bool,
}

impl Default for IncludeSections {
    fn default() -> Self {
        Self {
            payslip: true,
            attendance: true,
            contract: true,
        }
    }
}

impl IncludeSections {
    /// The employee section is not toggleable and is always included.
    pub fn includes(&self, section: Section) -> bool {
        match section {
            Section::Payslip => self.payslip,
            Section::Attendance => self.attendance,
            Section::Contract => self.contract,
            Section::Employee => true,
        }
    }

    pub fn set(&mut self, section: Section, included: bool) {
        match section {
            Section::Payslip => self.payslip = included,
            Section::Attendance => self.attendance = included,
            Section::Contract => self.contract = included,
            Section::Employee => {}
        }
    }
}
