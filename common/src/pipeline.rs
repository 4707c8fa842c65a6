use std::path::Path;
use thiserror::Error;

use crate::dataset::{self, Dataset};
use crate::ops::{OpError, OpRegistry};
use crate::task::OperationSpec;

/// Prefijo fijo del artefacto de salida.
pub const OUTPUT_PREFIX: &str = "processed_";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("operación sin handler registrado: '{0}'")]
    UnknownOperation(String),

    #[error("la operación '{name}' (paso {step}) falló")]
    Operation {
        name: String,
        step: usize,
        #[source]
        source: OpError,
    },

    #[error("error de E/S sobre el dataset")]
    Io(#[from] csv::Error),
}

/// Aplica las operaciones en orden estricto, alimentando la salida de
/// cada handler como entrada del siguiente. `on_applied(i, op)` se
/// dispara tras cada paso exitoso, para que el caller persista el
/// avance: una escritura durable por operación, sin batching.
///
/// El primer handler que falla aborta todo: no corre ninguna operación
/// posterior y no se escribe output parcial. El progreso queda en el
/// último valor comprometido.
pub fn apply_operations(
    registry: &OpRegistry,
    mut ds: Dataset,
    ops: &[OperationSpec],
    on_applied: &mut dyn FnMut(usize, &OperationSpec),
) -> Result<Dataset, PipelineError> {
    for (i, spec) in ops.iter().enumerate() {
        let handler = registry
            .get(&spec.op)
            .ok_or_else(|| PipelineError::UnknownOperation(spec.op.clone()))?;

        ds = handler(ds, &spec.params).map_err(|source| PipelineError::Operation {
            name: spec.op.clone(),
            step: i + 1,
            source,
        })?;

        on_applied(i, spec);
    }
    Ok(ds)
}

/// Progreso durable tras completar `completed` de `total` operaciones:
/// floor(completed / max(1, total) * 100).
pub fn progress_pct(completed: usize, total: usize) -> u8 {
    ((completed * 100) / total.max(1)) as u8
}

/// Nombre del artefacto: prefijo fijo + nombre original subido.
pub fn output_file_name(original_name: &str) -> String {
    format!("{OUTPUT_PREFIX}{original_name}")
}

/// Escribe el resultado bajo `output_dir` y devuelve la ruta final.
/// La ruta solo existe como valor de retorno si la escritura terminó
/// bien; nunca se reporta una ruta a medio escribir.
pub fn write_output(
    ds: &Dataset,
    output_dir: &str,
    original_name: &str,
) -> Result<String, PipelineError> {
    let path = Path::new(output_dir).join(output_file_name(original_name));
    dataset::write_csv(ds, &path)?;
    Ok(path.to_string_lossy().to_string())
}
