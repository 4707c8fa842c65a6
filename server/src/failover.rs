use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use common::store::{TaskPatch, TaskStore};
use common::TaskStatus;

use crate::state::{AppState, InFlight};
use crate::{FAILOVER_SWEEP_INTERVAL_SECS, MAX_JOB_ATTEMPTS, WORKER_HEARTBEAT_TIMEOUT_SECS};

/// Loop de tolerancia a fallos:
/// - detecta workers muertos (sin heartbeat)
/// - redespacha sus jobs in-flight (entrega at-least-once)
pub async fn run_failover_loop(state: AppState) {
    loop {
        sleep(Duration::from_secs(FAILOVER_SWEEP_INTERVAL_SECS)).await;

        if let Err(e) = sweep_once(&state) {
            warn!("error en failover sweep: {:?}", e);
        }
    }
}

/// Una pasada de chequeo:
/// 1. marca workers muertos
/// 2. saca sus jobs de in_flight
/// 3. los reencola (si no superan MAX_JOB_ATTEMPTS) con la tarea de
///    vuelta en Pending; el progreso durable queda donde estaba y
///    recién se resetea a 0 cuando otro worker reclama la tarea.
///
/// Un job redespachado puede re-ejecutar operaciones desde el principio
/// en otro worker: los handlers son idempotentes y eso lo hace seguro.
pub fn sweep_once(state: &AppState) -> Result<(), String> {
    let now = SystemTime::now();

    // 1) Detectar qué workers están muertos
    let mut newly_dead_workers: Vec<String> = Vec::new();

    {
        let mut workers = state.workers.lock().map_err(|_| "lock workers")?;

        for (worker_id, meta) in workers.iter_mut() {
            if meta.dead {
                continue;
            }

            match now.duration_since(meta.last_heartbeat) {
                Ok(elapsed) => {
                    if elapsed > Duration::from_secs(WORKER_HEARTBEAT_TIMEOUT_SECS) {
                        meta.dead = true;
                        newly_dead_workers.push(worker_id.clone());
                        warn!(
                            "marcando worker {} como DEAD (sin heartbeat hace {:?})",
                            worker_id, elapsed
                        );
                    }
                }
                Err(_) => {
                    // last_heartbeat en el futuro? raro, lo ignoramos.
                    continue;
                }
            }
        }
    }

    if newly_dead_workers.is_empty() {
        // nada que hacer esta pasada
        return Ok(());
    }

    let dead_set: HashSet<String> = newly_dead_workers.into_iter().collect();

    // 2) Sacar de in_flight los jobs que tenían esos workers
    let mut orphaned: Vec<InFlight> = Vec::new();

    {
        let mut in_flight = state.in_flight.lock().map_err(|_| "lock in_flight")?;
        let mut kept = std::collections::HashMap::new();

        for (job_id, entry) in in_flight.drain() {
            if dead_set.contains(&entry.worker_id) {
                orphaned.push(entry);
            } else {
                kept.insert(job_id, entry);
            }
        }

        *in_flight = kept;
    }

    // 3) Reencolar o dar por perdido cada job huérfano
    for entry in orphaned {
        let job = entry.job;
        let task_id = job.task_id.clone();

        // el evento efímero murió con el worker
        state.drop_progress_event(&task_id);

        if job.attempt + 1 <= MAX_JOB_ATTEMPTS {
            info!(
                "worker {} caído: redespachando job {} de la tarea {} (attempt={})",
                entry.worker_id,
                job.id,
                task_id,
                job.attempt + 1
            );
            state.store.update(
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::Pending),
                    ..Default::default()
                },
            );
            state.requeue_job(job, Duration::ZERO);
        } else {
            warn!(
                "job {} de la tarea {} superó los {} intentos tras caída del worker {}, marcando FAILED",
                job.id, task_id, MAX_JOB_ATTEMPTS, entry.worker_id
            );
            state.store.update(
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error_detail: Some(format!(
                        "el worker {} se perdió procesando la tarea y no quedan intentos",
                        entry.worker_id
                    )),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            );
        }
    }

    Ok(())
}
