use serde::{Deserialize, Serialize};

use crate::progress::ProgressEvent;
use crate::task::TaskId;
use crate::worker::WorkerId;

pub type JobId = String;

/// Unidad de despacho de la cola: 1:1 con una tarea mientras se
/// procesa. El `attempt` lo lleva la capa de cola, no la tarea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_id: TaskId,
    pub attempt: u32,
}

/* --------- worker <-> server: claim, progreso y cierre --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobClaimRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobClaimResponse {
    /// None si no hay trabajo reclamable ahora mismo.
    pub job: Option<Job>,
}

/// Avance de una tarea en vuelo: la escritura durable (si corresponde)
/// viaja junto con el evento efímero de mayor resolución.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdateRequest {
    pub task_id: TaskId,
    /// Porcentaje durable a comprometer (una escritura por operación).
    pub progress: Option<u8>,
    pub event: ProgressEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdateResponse {
    pub ok: bool,
}

/// Estado de cola de un job, para correlación vía `job_handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub state: JobState,
    pub ready: bool,
    /// Último evento efímero del job, si sigue corriendo.
    pub meta: Option<ProgressEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompleteRequest {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub success: bool,
    /// Ruta del artefacto, solo si success.
    pub result_path: Option<String>,
    /// Mensaje + cadena de causas, solo si !success.
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompleteResponse {
    pub ok: bool,
}
