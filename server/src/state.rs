// server/src/state.rs

use chrono::Utc;
use common::progress::ProgressEvent;
use common::store::{MemTaskStore, TaskPatch, TaskStore};
use common::{Job, JobCompleteRequest, JobId, TaskId, TaskStatus, WorkerId};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::{info, warn};

use crate::{MAX_JOB_ATTEMPTS, RETRY_DELAY_SECS};

/// Job esperando asignación. `ready_at` implementa el delay fijo entre
/// reintentos: un job reencolado no es reclamable antes de esa hora.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    pub ready_at: SystemTime,
}

/// Job asignado y todavía sin ack. El ack es tardío: la entrada recién
/// sale de acá cuando el worker reporta el cierre, así un worker caído
/// deja su job visible para redespacho.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub job: Job,
    pub worker_id: WorkerId,
    pub started_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
    pub max_concurrency: u32,

    // métricas
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub total_job_time_ms: u64,

    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

#[derive(Clone)]
pub struct AppState {
    /// registro durable de tareas
    pub store: MemTaskStore,
    /// jobs pendientes de asignar
    pub queue: Arc<Mutex<VecDeque<QueuedJob>>>,
    /// jobs asignados pero sin ack todavía
    pub in_flight: Arc<Mutex<HashMap<JobId, InFlight>>>,
    pub workers: Arc<Mutex<HashMap<WorkerId, WorkerMeta>>>,
    /// último evento efímero por tarea en vuelo
    pub progress_events: Arc<Mutex<HashMap<TaskId, ProgressEvent>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            store: MemTaskStore::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Mutex::new(HashMap::new())),
            progress_events: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Encola un job nuevo (attempt = 0) para la tarea y devuelve su id.
    pub fn enqueue_job(&self, task_id: &str) -> Job {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            attempt: 0,
        };

        let mut queue = self.queue.lock().unwrap();
        queue.push_back(QueuedJob {
            job: job.clone(),
            ready_at: SystemTime::now(),
        });
        job
    }

    /// Reencola un job para otro intento, con el delay pedido.
    pub fn requeue_job(&self, mut job: Job, delay: Duration) {
        job.attempt += 1;
        info!(
            "reencolando job {} de la tarea {} (attempt={})",
            job.id, job.task_id, job.attempt
        );

        let mut queue = self.queue.lock().unwrap();
        queue.push_back(QueuedJob {
            job,
            ready_at: SystemTime::now() + delay,
        });
    }

    /// Entrega el siguiente job reclamable al worker.
    ///
    /// El claim de la tarea es un compare-and-set Pending|Queued ->
    /// Processing contra el store; si el CAS falla (tarea inexistente o
    /// en otro estado) el job se descarta con warning y se sigue con el
    /// próximo: una tarea que no existe es un fallo permanente del job,
    /// sin retry.
    pub fn claim_next(&self, worker_id: &str) -> Option<Job> {
        let now = SystemTime::now();

        loop {
            let candidate = {
                let mut queue = self.queue.lock().unwrap();
                let idx = queue.iter().position(|q| q.ready_at <= now)?;
                queue.remove(idx)
            };

            let Some(candidate) = candidate else {
                return None;
            };
            let job = candidate.job;

            match self.store.claim(&job.task_id) {
                Some(task) => {
                    info!(
                        "asignando job {} (tarea={}, attempt={}) al worker {}",
                        job.id, task.id, job.attempt, worker_id
                    );

                    {
                        let mut in_flight = self.in_flight.lock().unwrap();
                        in_flight.insert(
                            job.id.clone(),
                            InFlight {
                                job: job.clone(),
                                worker_id: worker_id.to_string(),
                                started_at: SystemTime::now(),
                            },
                        );
                    }

                    {
                        let mut workers = self.workers.lock().unwrap();
                        if let Some(meta) = workers.get_mut(worker_id) {
                            meta.jobs_started += 1;
                        }
                    }

                    return Some(job);
                }
                None => {
                    warn!(
                        "descartando job {}: la tarea {} no existe o no es reclamable",
                        job.id, job.task_id
                    );
                    continue;
                }
            }
        }
    }

    /// Cierra un job reportado por un worker y aplica la política de
    /// reintentos de la capa de cola.
    ///
    /// Fallo con intentos restantes: la tarea vuelve por la recuperación
    /// transitoria Processing -> Pending (el progreso recién se resetea
    /// en el próximo claim) y el job se reencola con el delay fijo.
    /// Fallo con presupuesto agotado: se persiste error_detail +
    /// completed_at + Failed, una sola vez.
    pub fn complete_job(&self, req: &JobCompleteRequest) -> bool {
        let inflight = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.remove(&req.job_id)
        };

        let Some(inflight) = inflight else {
            warn!("reporte de cierre para un job desconocido: {}", req.job_id);
            return false;
        };

        self.record_worker_outcome(&inflight, req.success);

        if req.success {
            self.store.update(
                &req.task_id,
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    progress: Some(100),
                    result_path: req.result_path.clone(),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            );
            self.drop_progress_event(&req.task_id);
            info!("tarea {} completada (job {})", req.task_id, req.job_id);
            return true;
        }

        let detail = req
            .error_detail
            .clone()
            .unwrap_or_else(|| "error no especificado".to_string());

        if inflight.job.attempt + 1 <= MAX_JOB_ATTEMPTS {
            warn!(
                "job {} de la tarea {} falló (attempt={}): {}",
                req.job_id,
                req.task_id,
                inflight.job.attempt,
                detail.lines().next().unwrap_or("")
            );
            // recuperación transitoria: la tarea vuelve a ser reclamable
            self.store.update(
                &req.task_id,
                TaskPatch {
                    status: Some(TaskStatus::Pending),
                    ..Default::default()
                },
            );
            self.drop_progress_event(&req.task_id);
            self.requeue_job(inflight.job, Duration::from_secs(RETRY_DELAY_SECS));
        } else {
            warn!(
                "job {} de la tarea {} agotó los {} intentos, marcando FAILED",
                req.job_id, req.task_id, MAX_JOB_ATTEMPTS
            );
            self.store.update(
                &req.task_id,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error_detail: Some(detail),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            );
            self.drop_progress_event(&req.task_id);
        }

        true
    }

    fn record_worker_outcome(&self, inflight: &InFlight, success: bool) {
        let duration_ms: u64 = inflight
            .started_at
            .elapsed()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut workers = self.workers.lock().unwrap();
        if let Some(meta) = workers.get_mut(&inflight.worker_id) {
            meta.total_job_time_ms += duration_ms;
            if success {
                meta.jobs_succeeded += 1;
            } else {
                meta.jobs_failed += 1;
            }
        }
    }

    /// Los eventos efímeros no se retienen para estados terminales ni
    /// sobreviven a un reencolado.
    pub fn drop_progress_event(&self, task_id: &str) {
        let mut events = self.progress_events.lock().unwrap();
        events.remove(task_id);
    }
}
