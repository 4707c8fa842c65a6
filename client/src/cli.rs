use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{
    ConfigureTaskRequest, ConfigureTaskResponse, CreateTaskRequest, CreateTaskResponse, Task,
    TaskProgressView, WorkerMetrics,
};
use reqwest::Client;
use std::env;
use std::path::Path;

/// Igual que en el worker:
/// - En Docker: SERVER_BASE_URL=http://server:8080
/// - Local: default http://localhost:8080
fn server_base_url() -> String {
    env::var("SERVER_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el server de procesamiento")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Da de alta una tarea que referencia un CSV ya subido
    Submit {
        /// Ruta del CSV (visible para server y workers)
        #[arg(value_name = "CSV")]
        source: String,

        /// Nombre original del archivo; default: el basename de la ruta
        #[arg(long)]
        name: Option<String>,
    },

    /// Adjunta la lista de operaciones y encola el job
    Configure {
        #[arg(value_name = "TASK_ID")]
        id: String,

        /// Config JSON: {"operations":[{"op":...,"params":{...}}]}
        #[arg(value_name = "CONFIG_JSON")]
        config: String,
    },

    /// Consulta el registro completo de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },

    /// Progreso combinado (durable + detalle efímero si hay)
    Progress {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },

    /// Lista tareas, opcionalmente filtradas por status
    Tasks {
        #[arg(long)]
        status: Option<String>,
    },

    Workers,

    /// Baja el artefacto procesado de una tarea completada
    Download {
        #[arg(value_name = "TASK_ID")]
        id: String,

        /// Ruta local donde guardar; default: el nombre del artefacto
        #[arg(long)]
        output: Option<String>,
    },
}

fn print_task(task: &Task) {
    println!("Tarea:");
    println!("  id: {}", task.id);
    println!("  archivo: {}", task.original_name);
    println!("  estado: {:?}", task.status);
    println!("  progreso: {}%", task.progress);
    println!("  creada: {}", task.created_at);
    if let Some(ref started) = task.started_at {
        println!("  iniciada: {}", started);
    }
    if let Some(ref done) = task.completed_at {
        println!("  terminada: {}", done);
    }
    if let Some(ref path) = task.result_path {
        println!("  resultado: {}", path);
    }
    if let Some(ref err) = task.error_detail {
        println!("  error:");
        for line in err.lines() {
            println!("    {}", line);
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = server_base_url();

    match cli.command {
        Commands::Submit { source, name } => {
            let original_name = name.unwrap_or_else(|| {
                Path::new(&source)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| source.clone())
            });

            let url = format!("{}/api/v1/tasks", base_url);
            let resp = client
                .post(&url)
                .json(&CreateTaskRequest {
                    source_path: source,
                    original_name,
                })
                .send()
                .await?;

            if resp.status().is_success() {
                let created: CreateTaskResponse = resp.json().await?;
                print_task(&created.task);
                println!("  -> {}", created.message);
            } else {
                println!("Error creando la tarea (status {})", resp.status());
            }
        }

        Commands::Configure { id, config } => {
            let config: serde_json::Value = serde_json::from_str(&config)?;

            let url = format!("{}/api/v1/tasks/{id}/config", base_url);
            let resp = client
                .put(&url)
                .json(&ConfigureTaskRequest { config })
                .send()
                .await?;

            if resp.status().is_success() {
                let configured: ConfigureTaskResponse = resp.json().await?;
                println!("{}", configured.message);
                println!("  job: {}", configured.job_id);
                print_task(&configured.task);
            } else {
                println!("Error configurando la tarea {id} (status {})", resp.status());
            }
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/tasks/{id}", base_url);
            let resp = client.get(&url).send().await?;

            if resp.status().is_success() {
                let task: Task = resp.json().await?;
                print_task(&task);
            } else {
                println!("No se encontró la tarea con id {id}");
            }
        }

        Commands::Progress { id } => {
            let url = format!("{}/api/v1/tasks/{id}/progress", base_url);
            let resp = client.get(&url).send().await?;

            if resp.status().is_success() {
                let view: TaskProgressView = resp.json().await?;
                println!("Tarea {}:", view.task_id);
                println!("  estado: {:?}", view.status);
                println!("  progreso: {}%", view.progress);
                if let Some(ref op) = view.operation {
                    println!("  operación: {}", op);
                    if let (Some(step), Some(total)) = (view.current_step, view.total_steps) {
                        println!("  paso: {}/{}", step, total);
                    }
                    if let Some(ref params) = view.operation_params {
                        if !params.is_empty() {
                            println!("  params: {}", params);
                        }
                    }
                }
                if let Some(ref err) = view.error_detail {
                    println!("  error: {}", err.lines().next().unwrap_or(""));
                }
            } else {
                println!("No se encontró la tarea con id {id}");
            }
        }

        Commands::Tasks { status } => {
            let mut url = format!("{}/api/v1/tasks", base_url);
            if let Some(ref s) = status {
                url = format!("{url}?status={s}");
            }

            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let tasks: Vec<Task> = resp.json().await?;
                if tasks.is_empty() {
                    println!("No hay tareas.");
                } else {
                    for t in tasks {
                        println!(
                            "{}  {:?}  {}%  {}",
                            t.id, t.status, t.progress, t.original_name
                        );
                    }
                }
            } else {
                println!("Error consultando /api/v1/tasks (status {})", resp.status());
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let workers: Vec<WorkerMetrics> = resp.json().await?;
                if workers.is_empty() {
                    println!("No hay workers registrados.");
                } else {
                    for w in workers {
                        println!("Worker {}", w.worker_id);
                        println!("  host           : {}", w.hostname);
                        println!("  dead           : {}", w.dead);
                        println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
                        println!(
                            "  concurrency    : max={}, activos={}",
                            w.max_concurrency, w.active_jobs
                        );
                        println!(
                            "  jobs           : started={}, ok={}, failed={}",
                            w.jobs_started, w.jobs_succeeded, w.jobs_failed
                        );
                        if let Some(avg) = w.avg_job_ms {
                            println!("  avg_job_ms     : {:.1}", avg);
                        } else {
                            println!("  avg_job_ms     : (sin datos)");
                        }
                        if let Some(cpu) = w.last_cpu_percent {
                            println!("  cpu_percent    : {:.1}%", cpu);
                        } else {
                            println!("  cpu_percent    : (sin datos)");
                        }
                        if let Some(mem) = w.last_mem_bytes {
                            println!("  mem_bytes      : {}", mem);
                        } else {
                            println!("  mem_bytes      : (sin datos)");
                        }
                        println!();
                    }
                }
            } else {
                println!(
                    "Error consultando /api/v1/workers (status {})",
                    resp.status()
                );
            }
        }

        Commands::Download { id, output } => {
            // primero el registro, para conocer el nombre del artefacto
            let task_url = format!("{}/api/v1/tasks/{id}", base_url);
            let resp = client.get(&task_url).send().await?;
            if !resp.status().is_success() {
                println!("No se encontró la tarea con id {id}");
                return Ok(());
            }
            let task: Task = resp.json().await?;

            let url = format!("{}/api/v1/tasks/{id}/result", base_url);
            let resp = client.get(&url).send().await?;

            if resp.status().is_success() {
                let default_name = task
                    .result_path
                    .as_deref()
                    .and_then(|p| Path::new(p).file_name())
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("processed_{}", task.original_name));

                let dest = output.unwrap_or(default_name);
                let bytes = resp.bytes().await?;
                std::fs::write(&dest, &bytes)?;
                println!("Resultado guardado en {dest} ({} bytes)", bytes.len());
            } else {
                println!(
                    "La tarea {id} no tiene resultado disponible (status {})",
                    resp.status()
                );
            }
        }
    }

    Ok(())
}
