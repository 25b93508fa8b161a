// Workflow Definition - Immutable step graphs, validated at load time

use leavers_shared::TaskInfo;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

use super::conditions::SkipCondition;
use super::reminders::ReminderCadence;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub task_name: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub start: bool,
    #[serde(default)]
    pub task_info: TaskInfo,
    #[serde(default)]
    pub reminder: Option<ReminderCadence>,
    #[serde(default)]
    pub skip_conditions: Vec<SkipCondition>,
}

impl Step {
    pub fn new(step_id: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            task_name: task_name.into(),
            targets: Vec::new(),
            start: false,
            task_info: TaskInfo::new(),
            reminder: None,
            skip_conditions: Vec::new(),
        }
    }

    pub fn as_start(mut self) -> Self {
        self.start = true;
        self
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_info(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.task_info.insert(key.to_string(), value.into());
        self
    }

    pub fn with_reminder(mut self, cadence: ReminderCadence) -> Self {
        self.reminder = Some(cadence);
        self
    }

    pub fn skip_when(mut self, condition: SkipCondition) -> Self {
        self.skip_conditions.push(condition);
        self
    }

    pub fn targets_self(&self) -> bool {
        self.targets.iter().any(|t| *t == self.step_id)
    }

    /// Declared targets other than the step itself.
    pub fn onward_targets(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| **t != self.step_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    start: usize,
}

impl Workflow {
    /// Validates the graph: unique step ids, exactly one start step and no
    /// dangling targets. Unreachable steps are logged, not rejected.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> EngineResult<Self> {
        let name = name.into();
        let invalid = |reason: String| EngineError::InvalidWorkflow {
            name: name.clone(),
            reason,
        };

        let mut index = HashMap::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            if index.insert(step.step_id.clone(), position).is_some() {
                return Err(invalid(format!("duplicate step '{}'", step.step_id)));
            }
        }

        let starts: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start)
            .map(|(i, _)| i)
            .collect();
        let start = match starts.as_slice() {
            [only] => *only,
            [] => return Err(invalid("no start step".to_string())),
            _ => return Err(invalid(format!("{} start steps", starts.len()))),
        };

        for step in &steps {
            if let Some(missing) = step.targets.iter().find(|t| !index.contains_key(*t)) {
                return Err(invalid(format!(
                    "step '{}' targets unknown step '{}'",
                    step.step_id, missing
                )));
            }
        }

        let workflow = Self {
            name,
            steps,
            index,
            start,
        };
        for step_id in workflow.unreachable_steps() {
            warn!("Workflow '{}': step '{}' is unreachable from start", workflow.name, step_id);
        }
        Ok(workflow)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.index.get(step_id).map(|&i| &self.steps[i])
    }

    pub fn start_step(&self) -> &Step {
        &self.steps[self.start]
    }

    pub fn unreachable_steps(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.start_step().step_id.as_str()]);
        while let Some(step_id) = queue.pop_front() {
            if !seen.insert(step_id) {
                continue;
            }
            if let Some(step) = self.step(step_id) {
                queue.extend(step.targets.iter().map(String::as_str));
            }
        }

        self.steps
            .iter()
            .map(|s| s.step_id.as_str())
            .filter(|id| !seen.contains(id))
            .collect()
    }
}

/// The named workflows an engine knows about.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalogue {
    workflows: HashMap<String, Workflow>,
}

impl WorkflowCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, workflow: Workflow) -> EngineResult<()> {
        if self.workflows.contains_key(workflow.name()) {
            return Err(EngineError::InvalidWorkflow {
                name: workflow.name().to_string(),
                reason: "a workflow with this name is already loaded".to_string(),
            });
        }
        self.workflows.insert(workflow.name().to_string(), workflow);
        Ok(())
    }

    pub fn with(mut self, workflow: Workflow) -> EngineResult<Self> {
        self.add(workflow)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }
}
