use crate::logging::log_registry_operation;
use crate::orchestration::step_handler::StateHandler;
use crate::state_machine::{InvalidStateToken, StateToken, WorkflowState};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Startup-time registration failures. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid process name '{0}': use ASCII letters, digits, '_', '-' or '.'")]
    InvalidProcessName(String),

    #[error("process '{process}' declares an invalid state: {source}")]
    InvalidState {
        process: String,
        #[source]
        source: InvalidStateToken,
    },

    #[error("process '{process}' declares state '{state}' more than once")]
    DuplicateState { process: String, state: String },

    #[error("process '{0}' declares no states")]
    NoStates(String),

    #[error("process '{process}' max_attempts must be greater than 0")]
    InvalidMaxAttempts { process: String },

    #[error("process '{0}' is registered more than once")]
    DuplicateProcess(String),

    #[error("no processes registered")]
    Empty,
}

/// What happens when a handler itself returns `FAILED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The failure is final.
    #[default]
    Terminal,
    /// The instance stays in its current state, records the error and is
    /// rescheduled with exponential backoff. The max-attempts ceiling still
    /// bounds it.
    RetryWithBackoff,
}

/// One process: its declared states and the handler for each.
pub struct ProcessDefinition {
    name: String,
    handlers: HashMap<StateToken, Arc<dyn StateHandler>>,
    failure_policy: FailurePolicy,
    max_attempts: Option<u32>,
}

impl ProcessDefinition {
    pub fn builder(name: impl Into<String>) -> ProcessDefinitionBuilder {
        ProcessDefinitionBuilder {
            name: name.into(),
            states: Vec::new(),
            failure_policy: FailurePolicy::default(),
            max_attempts: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Per-process override of the global attempts ceiling.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn handler(&self, state: &StateToken) -> Option<&Arc<dyn StateHandler>> {
        self.handlers.get(state)
    }

    /// Whether a handler may move an instance of this process to `state`.
    pub fn declares(&self, state: &WorkflowState) -> bool {
        match state {
            WorkflowState::Completed | WorkflowState::Failed => true,
            WorkflowState::Step(token) => self.handlers.contains_key(token),
        }
    }

    /// Declared states, sorted.
    pub fn states(&self) -> Vec<&StateToken> {
        let mut states: Vec<_> = self.handlers.keys().collect();
        states.sort();
        states
    }
}

impl fmt::Debug for ProcessDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDefinition")
            .field("name", &self.name)
            .field("states", &self.states())
            .field("failure_policy", &self.failure_policy)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

pub struct ProcessDefinitionBuilder {
    name: String,
    states: Vec<(String, Arc<dyn StateHandler>)>,
    failure_policy: FailurePolicy,
    max_attempts: Option<u32>,
}

impl ProcessDefinitionBuilder {
    pub fn state(mut self, token: impl Into<String>, handler: Arc<dyn StateHandler>) -> Self {
        self.states.push((token.into(), handler));
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn build(self) -> Result<ProcessDefinition, RegistryError> {
        if !is_valid_process_name(&self.name) {
            return Err(RegistryError::InvalidProcessName(self.name));
        }
        if self.states.is_empty() {
            return Err(RegistryError::NoStates(self.name));
        }
        if self.max_attempts == Some(0) {
            return Err(RegistryError::InvalidMaxAttempts { process: self.name });
        }

        let mut handlers = HashMap::with_capacity(self.states.len());
        for (raw, handler) in self.states {
            let token = StateToken::parse(&raw).map_err(|source| RegistryError::InvalidState {
                process: self.name.clone(),
                source,
            })?;
            if handlers.insert(token, handler).is_some() {
                return Err(RegistryError::DuplicateState {
                    process: self.name,
                    state: raw,
                });
            }
        }

        Ok(ProcessDefinition {
            name: self.name,
            handlers,
            failure_policy: self.failure_policy,
            max_attempts: self.max_attempts,
        })
    }
}

fn is_valid_process_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Result of resolving `(process, state)`. Misses are data conditions the
/// dispatcher turns into failures, never panics.
pub enum Lookup<'a> {
    Found {
        definition: &'a ProcessDefinition,
        handler: &'a Arc<dyn StateHandler>,
    },
    UnknownProcess,
    UnknownState { definition: &'a ProcessDefinition },
}

/// Immutable registry of every process the orchestrator can run.
#[derive(Debug)]
pub struct ProcessRegistry {
    processes: BTreeMap<String, ProcessDefinition>,
}

impl ProcessRegistry {
    pub fn builder() -> ProcessRegistryBuilder {
        ProcessRegistryBuilder {
            processes: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, process_name: &str, state: &StateToken) -> Lookup<'_> {
        match self.processes.get(process_name) {
            None => Lookup::UnknownProcess,
            Some(definition) => match definition.handler(state) {
                Some(handler) => Lookup::Found {
                    definition,
                    handler,
                },
                None => Lookup::UnknownState { definition },
            },
        }
    }

    pub fn process(&self, name: &str) -> Option<&ProcessDefinition> {
        self.processes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn process_names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

pub struct ProcessRegistryBuilder {
    processes: BTreeMap<String, ProcessDefinition>,
}

impl ProcessRegistryBuilder {
    pub fn register(mut self, definition: ProcessDefinition) -> Result<Self, RegistryError> {
        if self.processes.contains_key(definition.name()) {
            log_registry_operation(
                "register",
                Some(definition.name()),
                None,
                "rejected",
                Some("duplicate process"),
            );
            return Err(RegistryError::DuplicateProcess(definition.name().to_string()));
        }

        log_registry_operation(
            "register",
            Some(definition.name()),
            Some(definition.handlers.len()),
            "registered",
            None,
        );
        self.processes.insert(definition.name().to_string(), definition);
        Ok(self)
    }

    pub fn build(self) -> Result<ProcessRegistry, RegistryError> {
        if self.processes.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(ProcessRegistry {
            processes: self.processes,
        })
    }
}
