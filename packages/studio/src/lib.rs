//! WageWatch Studio
//!
//! Client-side core of the WageWatch rule studio. Administrators use it to
//! author labor-law rules as lists of condition / amount-owed checks and to
//! test them against sample payroll data before they are applied to real
//! payslips. This library provides:
//! - The dynamic parameter registry behind the payslip, attendance and
//!   contract forms
//! - Rule drafting with a scratch check editor, and rule CRUD
//! - Rule and expression testing with stale-response protection
//! - An HTTP implementation of the backend contracts
//!
//! # Example
//!
//! ```ignore
//! use wagewatch_studio::{
//!     BackendConfig, DynamicFormData, HttpBackend, IncludeSections, RuleStore, TestRunner,
//! };
//!
//! let backend = HttpBackend::new(&BackendConfig::from_env()?)?;
//! let mut store = RuleStore::new();
//! store.list(&backend).await?;
//!
//! let form = DynamicFormData::sample();
//! let mut runner = TestRunner::new();
//! if let Some(rule) = store.rules().first() {
//!     runner
//!         .run(&backend, rule.into(), &form, &IncludeSections::default())
//!         .await?;
//! }
//! ```

pub mod check;
pub mod cli;
pub mod client;
pub mod config;
pub mod draft;
pub mod error;
pub mod form;
pub mod notice;
pub mod registry;
pub mod rule;
pub mod store;
pub mod tester;
pub mod types;

// Re-export commonly used items
pub use check::{Check, CheckEditor, CommitOutcome};
pub use client::{Backend, HttpBackend};
pub use config::{BackendConfig, BackendConfigBuilder, IDENTITY_PARAMS};
pub use draft::{DraftMode, RuleDraft};
pub use error::{Result, StudioError};
pub use form::{DynamicFormData, FieldMap, IncludeSections};
pub use notice::{Notice, NoticeKind};
pub use registry::ParameterRegistry;
pub use rule::{Rule, RuleInput};
pub use store::RuleStore;
pub use tester::{
    CheckResult, Completion, ExpressionRequest, ExpressionResult, ExpressionTester,
    ExpressionType, IntegrityIssue, RequestToken, TestPayload, TestReport, TestResult,
    TestRunner, TestSubject,
};
pub use types::{
    DynamicParameter, FieldValue, NewParameter, ParamType, ParameterSchema, ParameterUpdate,
    Section,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
