use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::collections::HashMap;
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::info;

use common::store::{TaskPatch, TaskStore};
use common::{
    merged_view, ApiError, ConfigureTaskRequest, ConfigureTaskResponse, CreateTaskRequest,
    CreateTaskResponse, JobClaimRequest, JobClaimResponse, JobCompleteRequest,
    JobCompleteResponse, JobState, JobStatusResponse, ProgressUpdateRequest,
    ProgressUpdateResponse, Task, TaskListQuery,
    TaskProgressView, TaskStatus, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId,
    WorkerMetrics, WorkerRegisterRequest, WorkerRegisterResponse,
};

use crate::state::{AppState, WorkerMeta};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tasks", post(create_task).get(list_tasks))
        .route("/api/v1/tasks/progress", post(update_progress))
        .route("/api/v1/tasks/:id", get(get_task))
        .route("/api/v1/tasks/:id/config", put(configure_task))
        .route("/api/v1/tasks/:id/progress", get(task_progress))
        .route("/api/v1/tasks/:id/result", get(download_result))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/jobs/next", post(claim_job))
        .route("/api/v1/jobs/complete", post(complete_job))
        .route("/api/v1/jobs/:id", get(job_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn not_found(task_id: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            task_id: Some(task_id.to_string()),
            detail: "tarea no encontrada".to_string(),
        }),
    )
}

fn parse_status(s: &str) -> Option<TaskStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_uppercase())).ok()
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Crea una tarea nueva (PENDING) que referencia un CSV ya subido
async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, (StatusCode, Json<ApiError>)> {
    if !req.original_name.to_ascii_lowercase().ends_with(".csv") {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                task_id: None,
                detail: "solo se aceptan archivos .csv".to_string(),
            }),
        ));
    }

    let task = Task::new(req.source_path, req.original_name);
    let task_id = state.store.create(task.clone());
    info!("tarea creada: {} (source={})", task_id, task.source_path);

    Ok(Json(CreateTaskResponse {
        task,
        message: format!("tarea creada; configurar en PUT /api/v1/tasks/{task_id}/config"),
    }))
}

// Adjunta la lista de operaciones y encola el job.
// La config es inmutable una vez que la tarea sale de PENDING.
async fn configure_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConfigureTaskRequest>,
) -> Result<Json<ConfigureTaskResponse>, (StatusCode, Json<ApiError>)> {
    let task = state.store.get_by_id(&id).ok_or_else(|| not_found(&id))?;

    if task.status != TaskStatus::Pending {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiError {
                task_id: Some(id),
                detail: format!(
                    "la tarea ya salió de PENDING (status actual: {:?}); la config no se puede cambiar",
                    task.status
                ),
            }),
        ));
    }

    state.store.update(
        &id,
        TaskPatch {
            config: Some(req.config),
            status: Some(TaskStatus::Queued),
            ..Default::default()
        },
    );

    let job = state.enqueue_job(&id);
    let updated = state
        .store
        .update(
            &id,
            TaskPatch {
                job_handle: Some(job.id.clone()),
                ..Default::default()
            },
        )
        .ok_or_else(|| not_found(&id))?;

    info!("tarea {} configurada y encolada (job {})", id, job.id);

    Ok(Json(ConfigureTaskResponse {
        task: updated,
        job_id: job.id,
        message: "configuración guardada, job encolado".to_string(),
    }))
}

// Lista tareas, opcionalmente filtradas por status, por fecha de creación
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Json<Vec<Task>> {
    let filter = query.status.as_deref().and_then(parse_status);
    Json(state.store.list_by_status(filter))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, (StatusCode, Json<ApiError>)> {
    match state.store.get_by_id(&id) {
        Some(task) => Ok(Json(task)),
        None => Err(not_found(&id)),
    }
}

// Vista de progreso: registro durable + evento efímero si hay uno vivo
async fn task_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskProgressView>, (StatusCode, Json<ApiError>)> {
    let task = state.store.get_by_id(&id).ok_or_else(|| not_found(&id))?;

    let live = {
        let events = state.progress_events.lock().unwrap();
        events.get(&id).cloned()
    };

    let view = merged_view(&task, live.as_ref());

    // write-back oportunista: si el efímero va adelante del durable,
    // lo bajamos al registro (el store no lo deja retroceder)
    if task.status == TaskStatus::Processing {
        if let Some(ev) = &live {
            if ev.current != task.progress {
                state.store.update(
                    &id,
                    TaskPatch {
                        progress: Some(ev.current),
                        ..Default::default()
                    },
                );
            }
        }
    }

    Ok(Json(view))
}

// Descarga el artefacto de una tarea completada
async fn download_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let task = state.store.get_by_id(&id).ok_or_else(|| not_found(&id))?;

    let result_path = match (task.status, task.result_path) {
        (TaskStatus::Completed, Some(path)) => path,
        _ => {
            return Err((
                StatusCode::CONFLICT,
                Json(ApiError {
                    task_id: Some(id),
                    detail: "la tarea no tiene resultado disponible".to_string(),
                }),
            ))
        }
    };

    let bytes = tokio::fs::read(&result_path).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                task_id: Some(id),
                detail: format!("no se pudo leer el resultado: {e}"),
            }),
        )
    })?;

    let filename = std::path::Path::new(&result_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("processed.csv")
        .to_string();

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}

// Registra un worker nuevo
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let worker_id = uuid::Uuid::new_v4().to_string();

    {
        let mut workers = state.workers.lock().unwrap();
        workers.insert(
            worker_id.clone(),
            WorkerMeta {
                hostname: req.hostname,
                last_heartbeat: SystemTime::now(),
                dead: false,
                max_concurrency: req.max_concurrency,

                jobs_started: 0,
                jobs_succeeded: 0,
                jobs_failed: 0,
                total_job_time_ms: 0,

                last_cpu_percent: None,
                last_mem_bytes: None,
            },
        );
    }

    info!(
        "worker registrado: {} (max_concurrency={})",
        worker_id, req.max_concurrency
    );
    Json(WorkerRegisterResponse { worker_id })
}

// Heartbeat de worker, con lectura de CPU/memoria
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, StatusCode> {
    let mut workers = state.workers.lock().unwrap();
    if let Some(meta) = workers.get_mut(&req.worker_id) {
        meta.last_heartbeat = SystemTime::now();
        meta.last_cpu_percent = Some(req.cpu_percent);
        meta.last_mem_bytes = Some(req.mem_bytes);
        Ok(Json(WorkerHeartbeatResponse { ok: true }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Entrega el siguiente job reclamable (si hay, y si el worker tiene slots)
async fn claim_job(
    State(state): State<AppState>,
    Json(req): Json<JobClaimRequest>,
) -> Json<JobClaimResponse> {
    // 1) Cuántos jobs tiene ya este worker en vuelo
    let active_for_worker: usize = {
        let in_flight = state.in_flight.lock().unwrap();
        in_flight
            .values()
            .filter(|entry| entry.worker_id == req.worker_id)
            .count()
    };

    // 2) Capacidad máxima del worker
    let max_for_worker: u32 = {
        let workers = state.workers.lock().unwrap();
        workers
            .get(&req.worker_id)
            .map(|m| m.max_concurrency)
            .unwrap_or(1)
    };

    // Si ya está al tope, no le damos más jobs
    if active_for_worker as u32 >= max_for_worker {
        info!(
            "worker {} pidió job pero ya tiene {}/{} en vuelo",
            req.worker_id, active_for_worker, max_for_worker
        );
        return Json(JobClaimResponse { job: None });
    }

    let job = state.claim_next(&req.worker_id);
    Json(JobClaimResponse { job })
}

// Avance durable + evento efímero de una tarea en vuelo
async fn update_progress(
    State(state): State<AppState>,
    Json(req): Json<ProgressUpdateRequest>,
) -> Result<Json<ProgressUpdateResponse>, StatusCode> {
    let task = match state.store.get_by_id(&req.task_id) {
        Some(task) => task,
        None => return Err(StatusCode::NOT_FOUND),
    };

    // evento rezagado de un intento viejo: los terminales no retienen nada
    if task.status.is_terminal() {
        return Ok(Json(ProgressUpdateResponse { ok: false }));
    }

    {
        let mut events = state.progress_events.lock().unwrap();
        events.insert(req.task_id.clone(), req.event);
    }

    if let Some(progress) = req.progress {
        state.store.update(
            &req.task_id,
            TaskPatch {
                progress: Some(progress),
                ..Default::default()
            },
        );
    }

    Ok(Json(ProgressUpdateResponse { ok: true }))
}

// Estado de cola de un job, consultable por job_handle
async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<JobStatusResponse> {
    let queued = {
        let queue = state.queue.lock().unwrap();
        queue.iter().any(|q| q.job.id == id)
    };
    if queued {
        return Json(JobStatusResponse {
            state: JobState::Queued,
            ready: false,
            meta: None,
        });
    }

    let running_task = {
        let in_flight = state.in_flight.lock().unwrap();
        in_flight.get(&id).map(|entry| entry.job.task_id.clone())
    };
    if let Some(task_id) = running_task {
        let meta = {
            let events = state.progress_events.lock().unwrap();
            events.get(&task_id).cloned()
        };
        return Json(JobStatusResponse {
            state: JobState::Running,
            ready: false,
            meta,
        });
    }

    // ni en cola ni en vuelo: el job ya terminó (o nunca existió)
    Json(JobStatusResponse {
        state: JobState::Done,
        ready: true,
        meta: None,
    })
}

// El worker reporta que cerró un job (bien o mal)
async fn complete_job(
    State(state): State<AppState>,
    Json(req): Json<JobCompleteRequest>,
) -> Result<Json<JobCompleteResponse>, StatusCode> {
    if state.complete_job(&req) {
        Ok(Json(JobCompleteResponse { ok: true }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerMetrics>> {
    let now = SystemTime::now();

    // Jobs activos por worker (desde in_flight)
    let in_flight = state.in_flight.lock().unwrap();
    let mut active_by_worker: HashMap<WorkerId, u32> = HashMap::new();
    for entry in in_flight.values() {
        *active_by_worker.entry(entry.worker_id.clone()).or_insert(0) += 1;
    }
    drop(in_flight);

    let workers = state.workers.lock().unwrap();
    let mut out = Vec::new();

    for (wid, meta) in workers.iter() {
        let age_secs = now
            .duration_since(meta.last_heartbeat)
            .unwrap_or_default()
            .as_secs();

        let active = active_by_worker.get(wid).copied().unwrap_or(0);

        let avg_ms = if meta.jobs_succeeded > 0 {
            Some(meta.total_job_time_ms as f64 / meta.jobs_succeeded as f64)
        } else {
            None
        };

        out.push(WorkerMetrics {
            worker_id: wid.clone(),
            hostname: meta.hostname.clone(),
            dead: meta.dead,
            max_concurrency: meta.max_concurrency,
            last_heartbeat_secs_ago: age_secs,
            active_jobs: active,
            jobs_started: meta.jobs_started,
            jobs_succeeded: meta.jobs_succeeded,
            jobs_failed: meta.jobs_failed,
            avg_job_ms: avg_ms,
            last_cpu_percent: meta.last_cpu_percent,
            last_mem_bytes: meta.last_mem_bytes,
        });
    }

    Json(out)
}
