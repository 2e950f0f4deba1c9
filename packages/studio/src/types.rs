//! Core types shared by the registry, the form and the testers.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{Result, StudioError};

/// A named grouping of dynamic parameters.
///
/// `Employee` is only understood by the expression tester; rule tests send
/// the first three sections.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Section {
    Payslip,
    Attendance,
    Contract,
    Employee,
}

impl Section {
    /// Sections sent with every rule test, in payload order.
    pub const RULE_SECTIONS: [Section; 3] =
        [Section::Payslip, Section::Attendance, Section::Contract];
}

/// Declared type of a dynamic parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
    Number,
    Integer,
    String,
    Boolean,
    Date,
    /// Anything the backend sends that this client does not know yet.
    Other(String),
}

impl From<String> for ParamType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "number" | "float" | "decimal" => ParamType::Number,
            "integer" | "int" => ParamType::Integer,
            "string" | "text" => ParamType::String,
            "boolean" | "bool" => ParamType::Boolean,
            "date" => ParamType::Date,
            _ => ParamType::Other(value),
        }
    }
}

impl From<ParamType> for String {
    fn from(value: ParamType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Number => f.write_str("number"),
            ParamType::Integer => f.write_str("integer"),
            ParamType::String => f.write_str("string"),
            ParamType::Boolean => f.write_str("boolean"),
            ParamType::Date => f.write_str("date"),
            ParamType::Other(other) => f.write_str(other),
        }
    }
}

impl ParamType {
    /// Convert raw form input into a value of this type.
    ///
    /// Blank input for numeric types becomes `0`, matching how a cleared
    /// number field is submitted.
    pub fn coerce(&self, param: &str, raw: &str) -> Result<FieldValue> {
        let raw = raw.trim();
        match self {
            ParamType::Number => {
                if raw.is_empty() {
                    return Ok(FieldValue::Integer(0));
                }
                if let Ok(i) = raw.parse::<i64>() {
                    return Ok(FieldValue::Integer(i));
                }
                raw.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(FieldValue::Number)
                    .ok_or_else(|| {
                        StudioError::validation(param, format!("'{raw}' is not a number"))
                    })
            }
            ParamType::Integer => {
                if raw.is_empty() {
                    return Ok(FieldValue::Integer(0));
                }
                raw.parse::<i64>().map(FieldValue::Integer).map_err(|_| {
                    StudioError::validation(param, format!("'{raw}' is not a whole number"))
                })
            }
            ParamType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(FieldValue::Bool(true)),
                "false" | "0" | "no" | "" => Ok(FieldValue::Bool(false)),
                _ => Err(StudioError::validation(
                    param,
                    format!("'{raw}' is not true or false"),
                )),
            },
            ParamType::Date => {
                if !raw.is_empty() && chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_err()
                {
                    return Err(StudioError::validation(
                        param,
                        format!("'{raw}' is not a date (expected YYYY-MM-DD)"),
                    ));
                }
                Ok(FieldValue::Text(raw.to_string()))
            }
            ParamType::String | ParamType::Other(_) => Ok(FieldValue::Text(raw.to_string())),
        }
    }
}

/// A single value in the dynamic form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Number(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a scalar JSON value. Nulls, arrays and objects have no
    /// form representation and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Integer)
                .or_else(|| n.as_f64().map(FieldValue::Number)),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Number(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// An admin-configurable field available to conditions and formulas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicParameter {
    pub param: String,
    pub label_en: String,
    pub label_he: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
}

/// Body of `POST /dynamic-params/{section}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewParameter {
    pub param: String,
    pub label_en: String,
    pub label_he: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: String,
}

impl NewParameter {
    pub fn validate(&self) -> Result<()> {
        require("param", &self.param)?;
        require("label_en", &self.label_en)?;
        require("label_he", &self.label_he)?;
        require("description", &self.description)?;
        require("type", &self.param_type)
    }
}

/// Body of `PUT /dynamic-params/{section}/{param}`. The key and type of a
/// parameter are fixed once created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub label_en: String,
    pub label_he: String,
    pub description: String,
}

impl ParameterUpdate {
    pub fn validate(&self) -> Result<()> {
        require("label_en", &self.label_en)?;
        require("label_he", &self.label_he)?;
        require("description", &self.description)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StudioError::validation(field, format!("{field} is required")));
    }
    Ok(())
}

/// Parameters grouped by section, as returned by `GET /dynamic-params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub payslip: Vec<DynamicParameter>,
    #[serde(default)]
    pub attendance: Vec<DynamicParameter>,
    #[serde(default)]
    pub contract: Vec<DynamicParameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub employee: Vec<DynamicParameter>,
}

impl ParameterSchema {
    pub fn section(&self, section: Section) -> &[DynamicParameter] {
        match section {
            Section::Payslip => &self.payslip,
            Section::Attendance => &self.attendance,
            Section::Contract => &self.contract,
            Section::Employee => &self.employee,
        }
    }

    pub fn find(&self, section: Section, param: &str) -> Option<&DynamicParameter> {
        self.section(section).iter().find(|p| p.param == param)
    }

    pub fn is_empty(&self) -> bool {
        self.payslip.is_empty()
            && self.attendance.is_empty()
            && self.contract.is_empty()
            && self.employee.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_section_string_forms() {
        assert_eq!(Section::Payslip.as_ref(), "payslip");
        assert_eq!(Section::from_str("contract").ok(), Some(Section::Contract));
        assert!(Section::from_str("salary").is_err());
    }

    #[test]
    fn test_unknown_param_type_survives() {
        let param: DynamicParameter = serde_json::from_value(serde_json::json!({
            "param": "shift_code",
            "label_en": "Shift code",
            "label_he": "קוד משמרת",
            "description": "Roster shift code",
            "type": "enum"
        }))
        .unwrap();
        assert_eq!(param.param_type, ParamType::Other("enum".to_string()));
        let back = serde_json::to_value(&param).unwrap();
        assert_eq!(back["type"], "enum");
    }

    #[test]
    fn test_field_value_untagged_numbers() {
        let int: FieldValue = serde_json::from_str("5").unwrap();
        let float: FieldValue = serde_json::from_str("30.0").unwrap();
        assert_eq!(int, FieldValue::Integer(5));
        assert_eq!(float, FieldValue::Number(30.0));
    }

    #[test]
    fn test_coerce_number_input() {
        assert_eq!(
            ParamType::Number.coerce("hourly_rate", "30.5").unwrap(),
            FieldValue::Number(30.5)
        );
        assert_eq!(
            ParamType::Number.coerce("overtime_hours", "").unwrap(),
            FieldValue::Integer(0)
        );
        let err = ParamType::Number.coerce("hourly_rate", "abc").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_coerce_date_input() {
        assert!(ParamType::Date.coerce("start", "2024-07-01").is_ok());
        assert!(ParamType::Date.coerce("start", "07/01/2024").is_err());
    }

    #[test]
    fn test_new_parameter_requires_all_fields() {
        let param = NewParameter {
            param: "bonus".into(),
            label_en: "Bonus".into(),
            label_he: "".into(),
            description: "Monthly bonus".into(),
            param_type: "number".into(),
        };
        match param.validate() {
            Err(StudioError::Validation { field, .. }) => assert_eq!(field, "label_he"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_tolerates_missing_sections() {
        let schema: ParameterSchema =
            serde_json::from_str(r#"{"payslip": []}"#).unwrap();
        assert!(schema.is_empty());
        assert!(schema.find(Section::Contract, "hourly_rate").is_none());
    }
}
