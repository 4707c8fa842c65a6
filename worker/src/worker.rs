use anyhow::Result;
use common::ops::OpRegistry;
use common::{
    Job,
    JobClaimRequest,
    JobClaimResponse,
    JobCompleteRequest,
    ProgressUpdateRequest,
    Task,
    WorkerHeartbeatRequest,
    WorkerRegisterRequest,
    WorkerRegisterResponse,
};
use reqwest::Client;
use std::{env, sync::Arc, time::Duration};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::runner::{self, ProgressReport};

const DEFAULT_WORKER_CONCURRENCY: u32 = 1;

/// Obtiene la URL base del server.
/// - En Docker: SERVER_BASE_URL=http://server:8080
/// - Si no está definida, usa http://localhost:8080 (pruebas locales)
fn server_base_url() -> String {
    env::var("SERVER_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

/// Loop principal del worker.
/// - Se registra en el server.
/// - Hace heartbeats periódicos con CPU/MEM.
/// - Pide jobs mientras tenga slots libres (default: de a uno).
/// - Ejecuta el pipeline de cada job bloqueando fuera del runtime y
///   recién reporta el cierre al final (ack tardío).
pub async fn run() -> Result<()> {
    let base_url = server_base_url();
    let output_dir = env::var("OUTPUT_DIR").unwrap_or_else(|_| "/data/output".to_string());
    let client = Client::new();

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let max_concurrency: u32 = env::var("WORKER_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_WORKER_CONCURRENCY);

    let concurrency: usize = max_concurrency as usize;

    // Registro del worker
    let register_url = format!("{}/api/v1/workers/register", base_url);
    let res = client
        .post(&register_url)
        .json(&WorkerRegisterRequest {
            hostname,
            max_concurrency,
        })
        .send()
        .await?;
    let WorkerRegisterResponse { worker_id } = res.json().await?;

    info!(
        "worker {} registrado con concurrency={} contra {}",
        worker_id, concurrency, base_url
    );

    let sem = Arc::new(Semaphore::new(concurrency));
    let registry = Arc::new(OpRegistry::builtin());

    // System para leer CPU y memoria
    let mut sys = System::new_all();

    loop {
        // --------- Heartbeat al server con CPU/MEM ---------
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_info().cpu_usage();
        // used_memory devuelve KB -> lo pasamos a bytes
        let mem_bytes = sys.used_memory() * 1024;

        let hb_url = format!("{}/api/v1/workers/heartbeat", base_url);
        let _ = client
            .post(&hb_url)
            .json(&WorkerHeartbeatRequest {
                worker_id: worker_id.clone(),
                cpu_percent,
                mem_bytes,
            })
            .send()
            .await;

        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                // sin capacidad para jobs nuevos; esperamos un poco
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        // Pedimos un job al server (el claim CAS pasa del lado de él)
        let claim_url = format!("{}/api/v1/jobs/next", base_url);
        let res = client
            .post(&claim_url)
            .json(&JobClaimRequest {
                worker_id: worker_id.clone(),
            })
            .send()
            .await?;

        let claim: JobClaimResponse = res.json().await?;

        if let Some(job) = claim.job {
            info!(
                "tengo job {} de la tarea {} (attempt={})",
                job.id, job.task_id, job.attempt
            );

            let client_cloned = client.clone();
            let base_url_cloned = base_url.clone();
            let output_dir_cloned = output_dir.clone();
            let registry_cloned = registry.clone();

            tokio::spawn(async move {
                execute_job(
                    client_cloned,
                    base_url_cloned,
                    output_dir_cloned,
                    registry_cloned,
                    job,
                )
                .await;

                // liberar el slot recién al terminar
                drop(permit);
            });
        } else {
            // no hay job: devolvemos el permiso y dormimos
            drop(permit);
            sleep(Duration::from_secs(2)).await;
        }
    }
}

/// Ejecuta un job reclamado de punta a punta y reporta el cierre.
/// Todo error termina en un reporte con success=false para que la capa
/// de cola aplique su política de reintentos; acá no se traga nada.
async fn execute_job(
    client: Client,
    base_url: String,
    output_dir: String,
    registry: Arc<OpRegistry>,
    job: Job,
) {
    // 1) Traer la tarea (el server ya la dejó en Processing al asignar)
    let task_result: Result<Task, ()> = async {
        let task_url = format!("{}/api/v1/tasks/{}", base_url, job.task_id);
        let resp = client.get(&task_url).send().await.map_err(|e| {
            warn!("error HTTP al pedir la tarea {}: {:?}", job.task_id, e);
        })?;

        if !resp.status().is_success() {
            warn!(
                "server devolvió status {} al pedir la tarea {}",
                resp.status(),
                job.task_id
            );
            return Err(());
        }

        resp.json::<Task>().await.map_err(|e| {
            warn!("error parseando la tarea {}: {:?}", job.task_id, e);
        })
    }
    .await;

    let outcome = match task_result {
        Ok(task) => {
            // 2) Puente de progreso: el runner es sync y corre fuera del
            //    runtime; los reportes viajan por canal y acá se reenvían
            let (tx, mut rx) = mpsc::unbounded_channel::<ProgressReport>();

            let forward_client = client.clone();
            let forward_url = format!("{}/api/v1/tasks/progress", base_url);
            let forward_task_id = task.id.clone();
            let forward = tokio::spawn(async move {
                while let Some(rep) = rx.recv().await {
                    let _ = forward_client
                        .post(&forward_url)
                        .json(&ProgressUpdateRequest {
                            task_id: forward_task_id.clone(),
                            progress: rep.durable,
                            event: rep.event,
                        })
                        .send()
                        .await;
                }
            });

            let handle = tokio::task::spawn_blocking(move || {
                let mut report = |rep: ProgressReport| {
                    let _ = tx.send(rep);
                };
                runner::run_task(&task, &output_dir, &registry, &mut report)
            });

            let outcome = match handle.await {
                Ok(Ok(result_path)) => {
                    info!("terminé el job {} correctamente", job.id);
                    (true, Some(result_path), None)
                }
                Ok(Err(e)) => {
                    warn!("error procesando la tarea {}: {e}", job.task_id);
                    (false, None, Some(runner::describe_error(e)))
                }
                Err(e) => {
                    warn!("panic o join error en la tarea {}: {:?}", job.task_id, e);
                    (false, None, Some(format!("fallo interno del worker: {e}")))
                }
            };

            // el canal quedó cerrado con el runner; drenamos lo pendiente
            let _ = forward.await;
            outcome
        }
        Err(()) => (
            false,
            None,
            Some(format!("no se pudo obtener la tarea {}", job.task_id)),
        ),
    };

    // 3) Reportar el cierre (ack tardío: el server recién acá saca el
    //    job de in-flight)
    let (success, result_path, error_detail) = outcome;
    let complete_url = format!("{}/api/v1/jobs/complete", base_url);
    let _ = client
        .post(&complete_url)
        .json(&JobCompleteRequest {
            job_id: job.id.clone(),
            task_id: job.task_id.clone(),
            success,
            result_path,
            error_detail,
        })
        .send()
        .await;
}
