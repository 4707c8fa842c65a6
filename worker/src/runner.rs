use tracing::info;

use common::dataset;
use common::ops::OpRegistry;
use common::pipeline::{self, PipelineError};
use common::progress::ProgressEvent;
use common::Task;

/// Reporte de avance que el runner empuja hacia afuera: el evento
/// efímero de la fase actual, más el porcentaje durable a comprometer
/// cuando el paso cerró una operación (una escritura por operación).
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub event: ProgressEvent,
    pub durable: Option<u8>,
}

/// Ejecuta el pipeline de una tarea ya reclamada (status Processing).
///
/// Protocolo por job: evento inicial -> carga completa del CSV en
/// memoria -> operaciones en orden, cada una con su escritura durable
/// -> evento de guardado -> escritura del artefacto. Devuelve la ruta
/// del resultado. El primer error corta acá, sin output parcial, y el
/// shell lo reporta para que la capa de cola aplique su retry.
pub fn run_task(
    task: &Task,
    output_dir: &str,
    registry: &OpRegistry,
    report: &mut dyn FnMut(ProgressReport),
) -> Result<String, PipelineError> {
    let ops = task.operations();
    let total_ops = ops.len();

    report(ProgressReport {
        event: ProgressEvent::starting(),
        durable: None,
    });

    let ds = dataset::read_csv(&task.source_path)?;
    info!(
        "csv leído para la tarea {}: {} filas, {} columnas",
        task.id,
        ds.n_rows(),
        ds.n_cols()
    );
    report(ProgressReport {
        event: ProgressEvent::file_loaded(total_ops as u32),
        durable: None,
    });

    let ds = pipeline::apply_operations(registry, ds, &ops, &mut |i, spec| {
        report(ProgressReport {
            event: ProgressEvent::applying(&spec.op, &spec.params, i as u32, total_ops as u32),
            durable: Some(pipeline::progress_pct(i + 1, total_ops)),
        });
    })?;

    report(ProgressReport {
        event: ProgressEvent::saving(total_ops as u32),
        durable: None,
    });

    pipeline::write_output(&ds, output_dir, &task.original_name)
}

/// error_detail para persistir: mensaje legible + cadena de causas.
pub fn describe_error(err: PipelineError) -> String {
    let err = anyhow::Error::from(err);
    format!("{err}\n\n{err:?}")
}
