//! Task status endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::server::state::AppState;
use crate::tasks::TaskCounts;
use crate::types::{Task, TaskStatus};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub counts: TaskCounts,
}

/// GET /api/tasks - List tasks, newest first, optionally filtered by status
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<TaskListResponse> {
    let orchestrator = state.orchestrator();
    let tasks: Vec<Task> = orchestrator
        .list_tasks()
        .into_iter()
        .filter(|t| query.status.map_or(true, |s| t.status == s))
        .collect();

    Json(TaskListResponse {
        tasks,
        counts: orchestrator.tasks().counts(),
    })
}

/// GET /api/tasks/:id - Current state of one task
pub async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Task>> {
    Ok(Json(state.orchestrator().get_task(id)?))
}
