use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobId;
use crate::task::{Task, TaskId, TaskStatus};

/// Largo máximo del render de params dentro de un evento. Es solo
/// presentación: la config almacenada nunca se trunca.
pub const PARAMS_RENDER_LIMIT: usize = 100;

/// Evento de progreso efímero que emite el worker durante la corrida.
///
/// Un único esquema para todas las fases (arranque, lectura, cada
/// operación, guardado); no sobrevive a una caída del worker, a
/// diferencia del campo durable `progress` de la tarea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-100.
    pub current: u8,
    /// Convencionalmente 100.
    pub total: u8,
    /// Texto corto para mostrar ("Applying remove_duplicates...").
    pub status: String,
    /// Nombre de operación o etiqueta de fase.
    pub operation: String,
    pub current_step: u32,
    pub total_steps: u32,
    /// Render truncado de los params del paso actual.
    pub params: String,
}

impl ProgressEvent {
    fn phase(
        current: u8,
        status: impl Into<String>,
        operation: impl Into<String>,
        current_step: u32,
        total_steps: u32,
    ) -> Self {
        Self {
            current,
            total: 100,
            status: status.into(),
            operation: operation.into(),
            current_step,
            total_steps,
            params: String::new(),
        }
    }

    /// Señal inicial: el pipeline arrancó.
    pub fn starting() -> Self {
        Self::phase(5, "Starting csv processing", "initializing", 0, 0)
    }

    /// El CSV de entrada ya está en memoria. El paso 1 de
    /// `total_ops + 2` es la lectura; el último es el guardado.
    pub fn file_loaded(total_ops: u32) -> Self {
        Self::phase(10, "Csv file loaded", "file_reading", 1, total_ops + 2)
    }

    /// Se aplicó la operación `index` (base 0) de `total_ops`.
    /// El tramo 10-90 se reparte entre las operaciones.
    pub fn applying(op_name: &str, params: &Value, index: u32, total_ops: u32) -> Self {
        let current = 10 + (((index + 1) * 80) / total_ops.max(1)) as u8;
        let mut ev = Self::phase(
            current,
            format!("Applying {op_name}..."),
            op_name,
            index + 2,
            total_ops + 2,
        );
        ev.params = render_params(params);
        ev
    }

    /// Escribiendo el artefacto de salida.
    pub fn saving(total_ops: u32) -> Self {
        Self::phase(95, "Saving processed file", "saving_results", total_ops + 2, total_ops + 2)
    }
}

/// Render acotado de los params de una operación.
pub fn render_params(params: &Value) -> String {
    let mut s = params.to_string();
    if let Some((idx, _)) = s.char_indices().nth(PARAMS_RENDER_LIMIT) {
        s.truncate(idx);
    }
    s
}

/// Vista de lectura del progreso: el registro durable, enriquecido con
/// el último evento efímero cuando la tarea sigue en vuelo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_path: Option<String>,
    pub error_detail: Option<String>,
    pub job_handle: Option<JobId>,

    /// Detalle a nivel operación, solo si hay un evento vivo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_params: Option<String>,
}

/// Mezcla registro durable + evento efímero.
///
/// Para tareas en vuelo (Queued/Processing) el evento manda: su
/// `current` es el progreso que se muestra y trae el detalle de
/// operación. Para estados terminales solo cuenta el registro durable;
/// los eventos no se retienen.
pub fn merged_view(task: &Task, live: Option<&ProgressEvent>) -> TaskProgressView {
    let mut view = TaskProgressView {
        task_id: task.id.clone(),
        status: task.status,
        progress: task.progress,
        started_at: task.started_at,
        completed_at: task.completed_at,
        result_path: task.result_path.clone(),
        error_detail: task.error_detail.clone(),
        job_handle: task.job_handle.clone(),
        operation: None,
        current_step: None,
        total_steps: None,
        operation_params: None,
    };

    let in_flight = matches!(task.status, TaskStatus::Queued | TaskStatus::Processing);
    if let (true, Some(ev)) = (in_flight, live) {
        view.progress = ev.current;
        view.operation = Some(ev.operation.clone());
        view.current_step = Some(ev.current_step);
        view.total_steps = Some(ev.total_steps);
        view.operation_params = Some(ev.params.clone());
    }

    view
}
