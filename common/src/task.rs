use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobId;

pub type TaskId = String;

/// Estados del ciclo de vida de una tarea.
///
/// Solo se avanza hacia adelante; la única vuelta atrás permitida es
/// Processing -> Pending, cuando el job se reencola (retry o worker caído).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Un paso de transformación: nombre de operación + parámetros JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    pub op: String,
    #[serde(default)]
    pub params: Value,
}

/// Configuración que el cliente adjunta antes de encolar:
/// `{ "operations": [ { "op": ..., "params": {...} }, ... ] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

/// Extrae la lista de operaciones de la config persistida.
/// Config ausente o con forma inválida => lista vacía, nunca error
/// (el pipeline igual escribe el output y termina en 100).
pub fn operations_from_config(config: Option<&Value>) -> Vec<OperationSpec> {
    let Some(value) = config else {
        return Vec::new();
    };
    match serde_json::from_value::<TaskConfig>(value.clone()) {
        Ok(cfg) => cfg.operations,
        Err(_) => Vec::new(),
    }
}

/// Registro durable de una solicitud de procesamiento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Ruta del CSV de entrada. Se fija al crear y no cambia.
    pub source_path: String,

    /// Nombre original del archivo; solo se usa para derivar el
    /// nombre del artefacto de salida.
    pub original_name: String,

    /// Config tal cual la mandó el cliente. Inmutable una vez que la
    /// tarea sale de Pending.
    pub config: Option<Value>,

    pub status: TaskStatus,

    /// 0-100. No decrece mientras status = Processing; vuelve a 0 al
    /// entrar a Processing y llega a 100 solo en Completed.
    pub progress: u8,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Seteado si y solo si status = Completed.
    pub result_path: Option<String>,
    /// Seteado si y solo si status = Failed (mensaje + cadena de causas).
    pub error_detail: Option<String>,

    /// Id del job encolado, para correlacionar progreso efímero.
    /// A lo sumo un job vivo por tarea.
    pub job_handle: Option<JobId>,
}

impl Task {
    pub fn new(source_path: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_path: source_path.into(),
            original_name: original_name.into(),
            config: None,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result_path: None,
            error_detail: None,
            job_handle: None,
        }
    }

    /// Operaciones a ejecutar, en el orden configurado.
    pub fn operations(&self) -> Vec<OperationSpec> {
        operations_from_config(self.config.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_nueva_arranca_pending_sin_resultados() {
        let t = Task::new("/data/uploads/abc.csv", "ventas.csv");

        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.progress, 0);
        assert!(t.started_at.is_none());
        assert!(t.completed_at.is_none());
        assert!(t.result_path.is_none());
        assert!(t.error_detail.is_none());
        assert!(t.job_handle.is_none());
        assert!(t.operations().is_empty());
    }

    #[test]
    fn status_se_serializa_en_screaming_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(s, "\"PROCESSING\"");

        let back: TaskStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(back, TaskStatus::Failed);
    }

    #[test]
    fn operations_from_config_lee_lista_ordenada() {
        let cfg = json!({
            "operations": [
                { "op": "remove_duplicates", "params": { "subset": ["B"] } },
                { "op": "drop_columns", "params": { "columns": ["C"] } },
            ]
        });

        let ops = operations_from_config(Some(&cfg));
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, "remove_duplicates");
        assert_eq!(ops[1].op, "drop_columns");
    }

    #[test]
    fn operations_from_config_tolera_config_ausente_o_invalida() {
        // ausente
        assert!(operations_from_config(None).is_empty());

        // no es un objeto
        let not_a_map = json!("remove_duplicates");
        assert!(operations_from_config(Some(&not_a_map)).is_empty());

        // objeto sin "operations"
        let empty_obj = json!({});
        assert!(operations_from_config(Some(&empty_obj)).is_empty());

        // "operations" con forma equivocada
        let bad_ops = json!({ "operations": "remove_duplicates" });
        assert!(operations_from_config(Some(&bad_ops)).is_empty());
    }

    #[test]
    fn operation_spec_sin_params_usa_default() {
        let op: OperationSpec =
            serde_json::from_value(json!({ "op": "remove_duplicates" })).unwrap();
        assert_eq!(op.op, "remove_duplicates");
        assert!(op.params.is_null());
    }
}
