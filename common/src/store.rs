use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::job::JobId;
use crate::task::{Task, TaskId, TaskStatus};

/// Parche de actualización parcial. Solo los campos en Some se
/// escriben; los demás quedan exactamente como estaban (nada de
/// pisar campos que otro no tocó).
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub config: Option<Value>,
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_path: Option<String>,
    pub error_detail: Option<String>,
    pub job_handle: Option<JobId>,
}

/// Interfaz de persistencia de tareas que consume el núcleo.
/// El server la implementa en memoria; los tests también.
pub trait TaskStore: Send + Sync {
    fn create(&self, task: Task) -> TaskId;

    fn get_by_id(&self, id: &str) -> Option<Task>;

    /// Tareas con ese status (o todas), ordenadas por fecha de creación.
    fn list_by_status(&self, status: Option<TaskStatus>) -> Vec<Task>;

    fn update(&self, id: &str, patch: TaskPatch) -> Option<Task>;

    /// Claim atómico: Pending|Queued -> Processing, con started_at =
    /// ahora y progress = 0, persistido antes de cualquier trabajo.
    /// Devuelve la tarea ya transicionada, o None si el estado previo
    /// no era reclamable (CAS fallido: otro worker llegó primero, o la
    /// tarea ya terminó).
    fn claim(&self, id: &str) -> Option<Task>;
}

/// Implementación en memoria: un mapa detrás de un mutex. El mutex es
/// lo que hace atómico al claim.
#[derive(Clone, Default)]
pub struct MemTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl MemTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemTaskStore {
    fn create(&self, task: Task) -> TaskId {
        let id = task.id.clone();
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(id.clone(), task);
        id
    }

    fn get_by_id(&self, id: &str) -> Option<Task> {
        let tasks = self.tasks.lock().unwrap();
        tasks.get(id).cloned()
    }

    fn list_by_status(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let tasks = self.tasks.lock().unwrap();
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    fn update(&self, id: &str, patch: TaskPatch) -> Option<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id)?;

        if let Some(config) = patch.config {
            task.config = Some(config);
        }
        if let Some(progress) = patch.progress {
            // mientras la tarea sigue Processing, el progreso durable
            // no puede retroceder (el reset a 0 pasa por claim)
            if patch.status.is_none() && task.status == TaskStatus::Processing {
                task.progress = task.progress.max(progress);
            } else {
                task.progress = progress;
            }
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(started_at) = patch.started_at {
            task.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            task.completed_at = Some(completed_at);
        }
        if let Some(result_path) = patch.result_path {
            task.result_path = Some(result_path);
        }
        if let Some(error_detail) = patch.error_detail {
            task.error_detail = Some(error_detail);
        }
        if let Some(job_handle) = patch.job_handle {
            task.job_handle = Some(job_handle);
        }

        Some(task.clone())
    }

    fn claim(&self, id: &str) -> Option<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(id)?;

        match task.status {
            TaskStatus::Pending | TaskStatus::Queued => {
                task.status = TaskStatus::Processing;
                task.started_at = Some(Utc::now());
                task.progress = 0;
                Some(task.clone())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with(task: Task) -> (MemTaskStore, TaskId) {
        let store = MemTaskStore::new();
        let id = store.create(task);
        (store, id)
    }

    #[test]
    fn claim_transiciona_pending_a_processing_y_resetea_progreso() {
        let mut task = Task::new("/data/in.csv", "in.csv");
        task.progress = 40; // quedó de un intento anterior
        let (store, id) = store_with(task);

        let claimed = store.claim(&id).unwrap();

        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.progress, 0);
        assert!(claimed.started_at.is_some());
    }

    #[test]
    fn claim_acepta_queued_pero_no_estados_posteriores() {
        let mut task = Task::new("/data/in.csv", "in.csv");
        task.status = TaskStatus::Queued;
        let (store, id) = store_with(task);

        assert!(store.claim(&id).is_some());

        // segundo claim sobre la misma tarea: CAS fallido
        assert!(store.claim(&id).is_none());

        let mut done = Task::new("/data/in2.csv", "in2.csv");
        done.status = TaskStatus::Completed;
        let (store, id) = store_with(done);
        assert!(store.claim(&id).is_none());
    }

    #[test]
    fn claim_de_id_inexistente_devuelve_none() {
        let store = MemTaskStore::new();
        assert!(store.claim("no-existe").is_none());
    }

    #[test]
    fn update_parcial_no_pisa_campos_ajenos() {
        let (store, id) = store_with(Task::new("/data/in.csv", "in.csv"));

        store.update(
            &id,
            TaskPatch {
                status: Some(TaskStatus::Queued),
                job_handle: Some("job-1".into()),
                ..Default::default()
            },
        );

        let task = store.get_by_id(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.job_handle.as_deref(), Some("job-1"));
        // lo no parchado sigue intacto
        assert_eq!(task.source_path, "/data/in.csv");
        assert!(task.result_path.is_none());
    }

    #[test]
    fn el_progreso_durable_no_retrocede_mientras_processing() {
        let (store, id) = store_with(Task::new("/data/in.csv", "in.csv"));
        store.claim(&id).unwrap();

        store.update(
            &id,
            TaskPatch {
                progress: Some(50),
                ..Default::default()
            },
        );
        store.update(
            &id,
            TaskPatch {
                progress: Some(33), // update rezagado
                ..Default::default()
            },
        );

        assert_eq!(store.get_by_id(&id).unwrap().progress, 50);
    }

    #[test]
    fn list_by_status_filtra_y_ordena_por_creacion() {
        let store = MemTaskStore::new();

        let mut vieja = Task::new("/data/a.csv", "a.csv");
        vieja.created_at = Utc::now() - Duration::seconds(60);
        let vieja_id = store.create(vieja);

        let mut media = Task::new("/data/b.csv", "b.csv");
        media.created_at = Utc::now() - Duration::seconds(30);
        media.status = TaskStatus::Completed;
        store.create(media);

        let nueva_id = store.create(Task::new("/data/c.csv", "c.csv"));

        let pendientes = store.list_by_status(Some(TaskStatus::Pending));
        assert_eq!(pendientes.len(), 2);
        assert_eq!(pendientes[0].id, vieja_id);
        assert_eq!(pendientes[1].id, nueva_id);

        let todas = store.list_by_status(None);
        assert_eq!(todas.len(), 3);
    }
}
