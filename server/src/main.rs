mod failover;
mod handlers;
mod state;

use crate::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

/// Un worker sin heartbeat por más de esto se da por muerto.
pub const WORKER_HEARTBEAT_TIMEOUT_SECS: u64 = 20;
pub const FAILOVER_SWEEP_INTERVAL_SECS: u64 = 5;
/// Reintentos automáticos por job, además de la primera ejecución.
pub const MAX_JOB_ATTEMPTS: u32 = 3;
/// Delay fijo antes de que un job reencolado vuelva a ser reclamable.
pub const RETRY_DELAY_SECS: u64 = 30;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("server=debug,axum=info,tower_http=info")
        .init();

    let state = AppState::new();

    // router HTTP
    let app = handlers::build_router(state.clone());

    // sweep de failover en segundo plano
    let failover_state = state.clone();
    tokio::spawn(async move {
        failover::run_failover_loop(failover_state).await;
    });

    let listener = TcpListener::bind("0.0.0.0:8080").await.unwrap();
    info!("server escuchando en {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
