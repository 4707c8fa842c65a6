use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobId;
use crate::task::{Task, TaskId};

/* --------- cliente <-> server: alta y configuración --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    /// Ruta del CSV ya subido (el almacenamiento de uploads es un
    /// colaborador externo; acá solo se referencia).
    pub source_path: String,
    /// Nombre con el que el caller conoce al archivo; de acá sale el
    /// nombre del artefacto de salida.
    pub original_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task: Task,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureTaskRequest {
    /// Config completa tal cual se persiste:
    /// `{ "operations": [ { "op": ..., "params": {...} } ] }`
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureTaskResponse {
    pub task: Task,
    pub job_id: JobId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub task_id: Option<TaskId>,
    pub detail: String,
}
