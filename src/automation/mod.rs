//! Label-triggered email automation.
//!
//! The classifier decides which labels apply to an email; for each applied
//! label the orchestrator builds an [`ActionContext`] and runs the label's
//! actions, either in their configured order or as chosen by the LLM.

pub mod classifier;
pub mod context_builder;
pub mod executors;
pub mod label_validator;
pub mod model;
pub mod orchestrator;
pub mod recommended;
pub mod registry;
pub mod run;

pub use classifier::{Classification, EmailClassifier, LlmClassifier};
pub use context_builder::{ActionContext, ContextBuilder};
pub use label_validator::{MAX_LABELS, validate_and_filter_labels};
pub use model::{
    Action, ActionFunction, AutomationMode, EmailLabel, Label, LabelAction, LinkedAction, Sop,
};
pub use orchestrator::Orchestrator;
pub use recommended::{SetupSummary, setup_account_automation};
pub use registry::ActionRegistry;
pub use run::{ActionResult, AutomationRun, RunState};
