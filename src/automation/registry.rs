//! Action registry: static mapping from action function to executor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::automation::executors::{
    ActionExecutor, CreateTaskExecutor, DraftReplyExecutor, PlaceholderExecutor,
};
use crate::automation::model::{Action, ActionFunction};
use crate::llm::{LlmProvider, ToolDefinition};
use crate::store::Database;

/// Registry of executors keyed by action function.
pub struct ActionRegistry {
    executors: HashMap<ActionFunction, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with every built-in function: `draft_reply`, `create_task`
    /// and the placeholder functions.
    pub fn standard(store: Arc<dyn Database>, llm: Arc<dyn LlmProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DraftReplyExecutor::new(store.clone(), llm)));
        registry.register(Arc::new(CreateTaskExecutor::new(store)));
        for function in ActionFunction::ALL {
            if function.is_placeholder() {
                registry.register(Arc::new(PlaceholderExecutor::new(function)));
            }
        }
        registry
    }

    /// Register an executor, replacing any previous one for the same function.
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        let function = executor.function();
        if self.executors.insert(function, executor).is_some() {
            tracing::debug!(function = %function, "Replaced action executor");
        } else {
            tracing::debug!(function = %function, "Registered action executor");
        }
    }

    pub fn get(&self, function: ActionFunction) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(&function).cloned()
    }

    pub fn has(&self, function: ActionFunction) -> bool {
        self.executors.contains_key(&function)
    }

    /// Registered functions in canonical order.
    pub fn functions(&self) -> Vec<ActionFunction> {
        ActionFunction::ALL
            .into_iter()
            .filter(|f| self.executors.contains_key(f))
            .collect()
    }

    /// Tool definition for one configured action, or `None` if its function
    /// has no executor.
    pub fn tool_definition(&self, action: &Action) -> Option<ToolDefinition> {
        let executor = self.executors.get(&action.function)?;
        let mut description = action.effective_tool_description().to_string();
        if !action.instructions.trim().is_empty() {
            description.push_str("\n\nInstructions: ");
            description.push_str(action.instructions.trim());
        }
        Some(ToolDefinition {
            name: action.effective_tool_name().to_string(),
            description,
            parameters: executor.parameters_schema(),
        })
    }

    /// Tool definitions for the given actions, skipping unregistered functions
    /// and duplicate tool names (first wins).
    pub fn tool_definitions(&self, actions: &[Action]) -> Vec<ToolDefinition> {
        let mut seen = std::collections::HashSet::new();
        actions
            .iter()
            .filter_map(|action| self.tool_definition(action))
            .filter(|def| seen.insert(def.name.clone()))
            .collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::automation::executors::{ActionOutcome, ExecutionInput};
    use crate::error::ExecutorError;

    struct NoopExecutor(ActionFunction);

    #[async_trait]
    impl ActionExecutor for NoopExecutor {
        fn function(&self) -> ActionFunction {
            self.0
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"note": {"type": "string"}}})
        }

        async fn execute(&self, _input: ExecutionInput<'_>) -> Result<ActionOutcome, ExecutorError> {
            Ok(ActionOutcome::new("noop", json!({})))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ActionRegistry::new();
        assert!(!registry.has(ActionFunction::Notify));
        registry.register(Arc::new(NoopExecutor(ActionFunction::Notify)));
        assert!(registry.has(ActionFunction::Notify));
        assert!(registry.get(ActionFunction::Notify).is_some());
        assert!(registry.get(ActionFunction::Archive).is_none());
        assert_eq!(registry.functions(), vec![ActionFunction::Notify]);
    }

    #[test]
    fn tool_definition_uses_overrides_and_instructions() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(NoopExecutor(ActionFunction::Notify)));
        let account = Uuid::new_v4();

        let plain = Action::new(account, "Ping", ActionFunction::Notify);
        let def = registry.tool_definition(&plain).unwrap();
        assert_eq!(def.name, "notify");
        assert_eq!(def.description, ActionFunction::Notify.default_description());
        assert_eq!(def.parameters["properties"]["note"]["type"], "string");

        let custom = Action::new(account, "Ping boss", ActionFunction::Notify)
            .with_tool_name("ping_boss")
            .with_tool_description("Tell the boss")
            .with_instructions("Only for invoices");
        let def = registry.tool_definition(&custom).unwrap();
        assert_eq!(def.name, "ping_boss");
        assert_eq!(def.description, "Tell the boss\n\nInstructions: Only for invoices");

        let missing = Action::new(account, "Archive", ActionFunction::Archive);
        assert!(registry.tool_definition(&missing).is_none());
    }

    #[test]
    fn tool_definitions_skip_duplicate_names() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(NoopExecutor(ActionFunction::Notify)));
        let account = Uuid::new_v4();
        let actions = vec![
            Action::new(account, "First", ActionFunction::Notify),
            Action::new(account, "Second", ActionFunction::Notify),
            Action::new(account, "Third", ActionFunction::Notify).with_tool_name("notify_team"),
        ];
        let names: Vec<_> = registry
            .tool_definitions(&actions)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["notify", "notify_team"]);
    }
}
