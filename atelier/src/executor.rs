//! Plan executor: validates the task DAG, layers it, and runs each layer in
//! parallel under a concurrency cap with per-task deadlines.
//!
//! A failed task never aborts the plan by default — its failure is captured
//! in the aggregate result and later layers still run. Results produced
//! before any failure are always kept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::AgentRole;
use crate::graph::{self, Edge, PlanTaskSpec};
use crate::llm::ChatMessage;
use crate::workspace::WorkerSpace;

/// Outcome of one task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskRunResult {
    pub task_id: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub assigned_agent: Option<String>,
}

/// Aggregate outcome of a plan run.
#[derive(Clone, Debug, Serialize)]
pub struct PlanRunResult {
    pub success: bool,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_cost: f64,
    pub total_duration_seconds: f64,
    pub task_results: HashMap<String, TaskRunResult>,
    pub errors: Vec<String>,
}

impl PlanRunResult {
    fn validation_failure(total_tasks: usize, reason: String) -> Self {
        Self {
            success: false,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: total_tasks,
            total_cost: 0.0,
            total_duration_seconds: 0.0,
            task_results: HashMap::new(),
            errors: vec![format!("plan validation failed: {reason}")],
        }
    }
}

pub struct PlanExecutor {
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
    /// When false, a layer with failures stops the run; produced results are
    /// still returned.
    pub continue_on_failure: bool,
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            task_timeout: Duration::from_secs(300),
            continue_on_failure: true,
        }
    }
}

impl PlanExecutor {
    pub fn new(max_concurrent_tasks: usize, task_timeout: Duration) -> Self {
        Self {
            max_concurrent_tasks,
            task_timeout,
            continue_on_failure: true,
        }
    }

    /// Runs the whole plan through the worker space.
    pub async fn execute(
        &self,
        workspace: &Arc<WorkerSpace>,
        tasks: &[PlanTaskSpec],
        edges: &[Edge],
    ) -> PlanRunResult {
        if let Err(reason) = graph::validate(tasks, edges) {
            tracing::error!(error = %reason, "plan validation failed");
            return PlanRunResult::validation_failure(tasks.len(), reason.to_string());
        }

        let levels = graph::layers(tasks, edges);
        tracing::info!(
            total_tasks = tasks.len(),
            levels = levels.len(),
            max_concurrent = self.max_concurrent_tasks,
            "plan execution started"
        );

        let started = std::time::Instant::now();
        let mut task_results: HashMap<String, TaskRunResult> = HashMap::new();
        let mut errors = Vec::new();

        for (level_index, level) in levels.iter().enumerate() {
            tracing::info!(level = level_index + 1, task_count = level.len(), "executing level");
            let level_results = self
                .execute_level(workspace, level, tasks, edges, &task_results)
                .await;

            let mut level_failed = false;
            for result in level_results {
                if !result.success {
                    level_failed = true;
                    errors.push(
                        result
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("task {} failed", result.task_id)),
                    );
                }
                task_results.insert(result.task_id.clone(), result);
            }

            if level_failed && !self.continue_on_failure {
                tracing::warn!(level = level_index + 1, "stopping after failed level");
                break;
            }
        }

        let failed_tasks = task_results.values().filter(|r| !r.success).count()
            + tasks.len().saturating_sub(task_results.len());
        PlanRunResult {
            success: failed_tasks == 0,
            total_tasks: tasks.len(),
            completed_tasks: tasks.len() - failed_tasks,
            failed_tasks,
            total_cost: graph::total_cost(tasks),
            total_duration_seconds: (started.elapsed().as_secs_f64() * 10.0).round() / 10.0,
            task_results,
            errors,
        }
    }

    /// Runs one layer with at most `max_concurrent_tasks` tasks in flight.
    async fn execute_level(
        &self,
        workspace: &Arc<WorkerSpace>,
        level: &[String],
        tasks: &[PlanTaskSpec],
        edges: &[Edge],
        previous: &HashMap<String, TaskRunResult>,
    ) -> Vec<TaskRunResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let mut join_set = JoinSet::new();

        for task_id in level {
            let Some(task) = graph::task_by_id(tasks, task_id) else {
                continue; // validate() guarantees presence
            };
            let dependency_context = dependency_context(task, tasks, edges, previous);
            let task = task.clone();
            let workspace = workspace.clone();
            let semaphore = semaphore.clone();
            let timeout = self.task_timeout;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                run_single_task(&workspace, &task, dependency_context, timeout).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::error!(error = %err, "task join failed");
                }
            }
        }
        results
    }
}

/// Results of this task's successfully completed dependencies, for prompt
/// threading.
fn dependency_context(
    task: &PlanTaskSpec,
    tasks: &[PlanTaskSpec],
    edges: &[Edge],
    previous: &HashMap<String, TaskRunResult>,
) -> Vec<(String, String)> {
    let mut deps = graph::neighbors(&task.task_id, tasks, edges, true);
    deps.sort();
    deps.dedup();
    deps.into_iter()
        .filter_map(|dep_id| {
            previous
                .get(&dep_id)
                .filter(|r| r.success)
                .and_then(|r| r.result.clone())
                .map(|result| (dep_id, result))
        })
        .collect()
}

async fn run_single_task(
    workspace: &Arc<WorkerSpace>,
    task: &PlanTaskSpec,
    dependency_context: Vec<(String, String)>,
    timeout: Duration,
) -> TaskRunResult {
    let started = std::time::Instant::now();
    let assigned = task.assigned_to.clone();

    // Resolve the agent: by name first, then any ready agent of the role
    // with that name, then fail the task.
    let agent = match &assigned {
        Some(name) => match workspace.find_agent_by_name(name).await {
            Some(record) => Some(record),
            None => match AgentRole::parse(&name.to_lowercase()) {
                Some(role) => workspace.first_ready_by_role(role).await,
                None => None,
            },
        },
        None => workspace.first_ready_by_role(AgentRole::Code).await,
    };
    let Some(agent) = agent else {
        return TaskRunResult {
            task_id: task.task_id.clone(),
            success: false,
            result: None,
            error: Some(format!(
                "no agent found for {}",
                assigned.as_deref().unwrap_or("plan task")
            )),
            duration_seconds: 0.0,
            assigned_agent: assigned,
        };
    };

    let mut prompt = task.description.clone();
    if !dependency_context.is_empty() {
        prompt.push_str("\n\nContext from previous tasks:\n");
        for (dep_id, result) in &dependency_context {
            prompt.push_str(&format!("Previous result from {dep_id}: {result}\n"));
        }
    }

    tracing::info!(
        task_id = %task.task_id,
        agent_id = %agent.id,
        agent_name = %agent.name,
        "executing task"
    );

    let history: Vec<ChatMessage> = Vec::new();
    let execution = tokio::time::timeout(
        timeout,
        workspace.direct(agent.id, &prompt, &history, Some(&task.task_id), None),
    )
    .await;

    let duration_seconds = (started.elapsed().as_secs_f64() * 10.0).round() / 10.0;
    match execution {
        Err(_) => TaskRunResult {
            task_id: task.task_id.clone(),
            success: false,
            result: None,
            error: Some(format!("task execution timeout ({}s)", timeout.as_secs())),
            duration_seconds,
            assigned_agent: Some(agent.name),
        },
        Ok(Err(err)) => TaskRunResult {
            task_id: task.task_id.clone(),
            success: false,
            result: None,
            error: Some(err.to_string()),
            duration_seconds,
            assigned_agent: Some(agent.name),
        },
        Ok(Ok(report)) => TaskRunResult {
            task_id: task.task_id.clone(),
            success: report.success,
            result: report.success.then(|| report.response.clone()),
            error: (!report.success).then(|| report.response),
            duration_seconds,
            assigned_agent: Some(agent.name),
        },
    }
}
