use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::dataset::{is_missing, Dataset};

/// Errores que puede devolver un handler de operación.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("columna desconocida en subset: '{0}'")]
    UnknownColumn(String),

    #[error("parámetro '{param}' inválido: {detail}")]
    InvalidParam { param: &'static str, detail: String },
}

/// Handler de operación: dataset + params -> dataset.
///
/// Puro respecto a la tabla: no toca estado compartido fuera del
/// dataset y los params que recibe. Params opcionales ausentes usan
/// su default documentado en vez de fallar.
pub type OpHandler = fn(Dataset, &Value) -> Result<Dataset, OpError>;

/// Tabla de operaciones construida al arranque y pasada por referencia
/// al executor. Nada de registro global mutable: operaciones nuevas se
/// agregan extendiendo la tabla con `register`.
pub struct OpRegistry {
    handlers: HashMap<&'static str, OpHandler>,
}

impl OpRegistry {
    /// Tabla con las cuatro operaciones incorporadas.
    pub fn builtin() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register("remove_duplicates", remove_duplicates);
        reg.register("remove_missing_rows", remove_missing_rows);
        reg.register("drop_columns", drop_columns);
        reg.register("fill_missing", fill_missing);
        reg
    }

    pub fn register(&mut self, name: &'static str, handler: OpHandler) {
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<OpHandler> {
        self.handlers.get(name).copied()
    }
}

/* =========================
   Helpers de parámetros
   ========================= */

/// Lista de strings bajo `key`, si viene.
fn string_list(params: &Value, key: &'static str) -> Result<Option<Vec<String>>, OpError> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let Some(arr) = value.as_array() else {
        return Err(OpError::InvalidParam {
            param: key,
            detail: format!("se esperaba una lista, vino {value}"),
        });
    };
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_str() {
            Some(s) => out.push(s.to_string()),
            None => {
                return Err(OpError::InvalidParam {
                    param: key,
                    detail: format!("elemento no-string en la lista: {item}"),
                })
            }
        }
    }
    Ok(Some(out))
}

/// Índices de las columnas consideradas según `subset`.
/// Ausente o vacío => todas las columnas. Nombre desconocido => error
/// (el original levantaba KeyError al pasarlo a la librería de tablas).
fn subset_indices(ds: &Dataset, params: &Value) -> Result<Vec<usize>, OpError> {
    match string_list(params, "subset")? {
        Some(names) if !names.is_empty() => {
            let mut idx = Vec::with_capacity(names.len());
            for name in names {
                match ds.col_index(&name) {
                    Some(i) => idx.push(i),
                    None => return Err(OpError::UnknownColumn(name)),
                }
            }
            Ok(idx)
        }
        _ => Ok((0..ds.n_cols()).collect()),
    }
}

/// Clave canónica de una fila sobre las columnas consideradas.
fn row_key(row: &[Value], cols: &[usize]) -> String {
    let mut key = String::new();
    for &i in cols {
        key.push_str(&row[i].to_string());
        key.push('\u{1f}');
    }
    key
}

/* =========================
   Operaciones incorporadas
   ========================= */

/// remove_duplicates { subset?, keep? }
///
/// Deduplica por las columnas de `subset` (default: todas). `keep`
/// elige qué ocurrencia sobrevive: "first" (default), "last", o false
/// para tirar el grupo completo. El orden relativo de las filas que
/// quedan se conserva. `keep` no se valida por adelantado: un valor no
/// reconocido falla recién acá, al despachar sobre él.
pub fn remove_duplicates(mut ds: Dataset, params: &Value) -> Result<Dataset, OpError> {
    let cols = subset_indices(&ds, params)?;
    let keep = params.get("keep").cloned().unwrap_or(Value::Null);

    let survivors: Vec<bool> = match &keep {
        Value::Null => keep_first(&ds, &cols),
        Value::String(s) if s == "first" => keep_first(&ds, &cols),
        Value::String(s) if s == "last" => {
            let mut last: HashMap<String, usize> = HashMap::new();
            for (i, row) in ds.rows.iter().enumerate() {
                last.insert(row_key(row, &cols), i);
            }
            ds.rows
                .iter()
                .enumerate()
                .map(|(i, row)| last.get(&row_key(row, &cols)) == Some(&i))
                .collect()
        }
        Value::Bool(false) => {
            let mut count: HashMap<String, u32> = HashMap::new();
            for row in &ds.rows {
                *count.entry(row_key(row, &cols)).or_insert(0) += 1;
            }
            ds.rows
                .iter()
                .map(|row| count.get(&row_key(row, &cols)) == Some(&1))
                .collect()
        }
        other => {
            return Err(OpError::InvalidParam {
                param: "keep",
                detail: format!("se esperaba \"first\", \"last\" o false, vino {other}"),
            })
        }
    };

    let mut it = survivors.into_iter();
    ds.rows.retain(|_| it.next().unwrap_or(false));
    Ok(ds)
}

fn keep_first(ds: &Dataset, cols: &[usize]) -> Vec<bool> {
    let mut seen: HashSet<String> = HashSet::new();
    ds.rows
        .iter()
        .map(|row| seen.insert(row_key(row, cols)))
        .collect()
}

/// remove_missing_rows { subset?, how? }
///
/// Tira filas con celdas faltantes. how="any" (default) tira la fila
/// si falta alguna de las columnas consideradas; "all" solo si faltan
/// todas. `subset` restringe qué columnas se miran.
pub fn remove_missing_rows(mut ds: Dataset, params: &Value) -> Result<Dataset, OpError> {
    let cols = subset_indices(&ds, params)?;
    let how = params.get("how").and_then(|v| v.as_str()).unwrap_or("any");

    match how {
        "any" => ds
            .rows
            .retain(|row| !cols.iter().any(|&i| is_missing(&row[i]))),
        "all" => ds
            .rows
            .retain(|row| cols.is_empty() || !cols.iter().all(|&i| is_missing(&row[i]))),
        other => {
            return Err(OpError::InvalidParam {
                param: "how",
                detail: format!("se esperaba \"any\" o \"all\", vino \"{other}\""),
            })
        }
    }

    Ok(ds)
}

/// drop_columns { columns? }
///
/// Borra las columnas nombradas si existen. Los nombres se recortan de
/// espacios antes de comparar; nombres desconocidos se ignoran en
/// silencio. `columns` ausente o vacío es un no-op.
pub fn drop_columns(mut ds: Dataset, params: &Value) -> Result<Dataset, OpError> {
    let names: Vec<String> = params
        .get("columns")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    if names.is_empty() {
        return Ok(ds);
    }

    let drop: HashSet<usize> = names.iter().filter_map(|n| ds.col_index(n)).collect();
    if drop.is_empty() {
        return Ok(ds);
    }

    ds.columns = ds
        .columns
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, c)| c)
        .collect();

    for row in &mut ds.rows {
        let old = std::mem::take(row);
        *row = old
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !drop.contains(i))
            .map(|(_, v)| v)
            .collect();
    }

    Ok(ds)
}

/// fill_missing { method, columns }
///
/// method="constant": `columns` es un mapa columna -> valor de relleno.
/// method="mean": `columns` es una lista; cada columna se rellena con
/// la media aritmética de sus celdas numéricas no faltantes (si no hay
/// ninguna, la columna queda como está). Columnas desconocidas se
/// ignoran. Cualquier otro `method` es un no-op.
pub fn fill_missing(mut ds: Dataset, params: &Value) -> Result<Dataset, OpError> {
    match params.get("method").and_then(|v| v.as_str()) {
        Some("constant") => {
            let Some(map) = params.get("columns").and_then(|v| v.as_object()) else {
                return Ok(ds);
            };
            for (name, fill) in map {
                let Some(i) = ds.col_index(name) else {
                    continue;
                };
                for row in &mut ds.rows {
                    if is_missing(&row[i]) {
                        row[i] = fill.clone();
                    }
                }
            }
        }
        Some("mean") => {
            let names = string_list(params, "columns")?.unwrap_or_default();
            for name in names {
                let Some(i) = ds.col_index(&name) else {
                    continue;
                };
                let values: Vec<f64> = ds
                    .rows
                    .iter()
                    .filter_map(|row| row[i].as_f64())
                    .collect();
                if values.is_empty() {
                    continue;
                }
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                for row in &mut ds.rows {
                    if is_missing(&row[i]) {
                        row[i] = Value::from(mean);
                    }
                }
            }
        }
        _ => {}
    }

    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Dataset de prueba compartido: 5 columnas, 6 filas.
    /// B duplica en filas 0/1 ("x") y 3/4 ("z"); D y E tienen
    /// faltantes en las filas 2 y 4.
    fn sample() -> Dataset {
        Dataset {
            columns: vec!["A".into(), "B".into(), "C".into(), "D".into(), "E".into()],
            rows: vec![
                vec![json!(1), json!("x"), json!(24), json!(1.0), json!("a")],
                vec![json!(1), json!("x"), json!(24), json!(2.0), json!("b")],
                vec![json!(2), json!("y"), json!(34), Value::Null, Value::Null],
                vec![json!(3), json!("z"), json!(67), json!(4.0), json!("d")],
                vec![json!(3), json!("z"), json!(67), Value::Null, Value::Null],
                vec![json!(4), json!("w"), json!(89), json!(6.0), json!("f")],
            ],
        }
    }

    /* =========================
       REMOVE_DUPLICATES
       ========================= */

    #[test]
    fn remove_duplicates_por_subset_deja_cuatro_filas() {
        let out = remove_duplicates(sample(), &json!({ "subset": ["B"] })).unwrap();

        assert_eq!(out.n_rows(), 4);
        let b: Vec<&Value> = out.rows.iter().map(|r| &r[1]).collect();
        assert_eq!(b, vec![&json!("x"), &json!("y"), &json!("z"), &json!("w")]);
        // keep="first" por default: sobreviven las primeras ocurrencias
        assert_eq!(out.rows[0][3], json!(1.0));
    }

    #[test]
    fn remove_duplicates_keep_last_conserva_ultimas_ocurrencias() {
        let out =
            remove_duplicates(sample(), &json!({ "subset": ["B"], "keep": "last" })).unwrap();

        assert_eq!(out.n_rows(), 4);
        // la fila superviviente de "x" es la segunda (D = 2.0),
        // pero el orden relativo original se mantiene
        assert_eq!(out.rows[0][3], json!(2.0));
        let b: Vec<&Value> = out.rows.iter().map(|r| &r[1]).collect();
        assert_eq!(b, vec![&json!("x"), &json!("y"), &json!("z"), &json!("w")]);
    }

    #[test]
    fn remove_duplicates_keep_false_tira_el_grupo_completo() {
        let out =
            remove_duplicates(sample(), &json!({ "subset": ["B"], "keep": false })).unwrap();

        // "x" y "z" desaparecen enteros; quedan "y" y "w"
        assert_eq!(out.n_rows(), 2);
        assert_eq!(out.rows[0][1], json!("y"));
        assert_eq!(out.rows[1][1], json!("w"));
    }

    #[test]
    fn remove_duplicates_sin_subset_compara_todas_las_columnas() {
        // las filas 0/1 difieren en D y E, así que no hay duplicado exacto
        let out = remove_duplicates(sample(), &json!({})).unwrap();
        assert_eq!(out.n_rows(), 6);
    }

    #[test]
    fn remove_duplicates_sobre_su_propia_salida_es_noop() {
        let params = json!({ "subset": ["B"] });
        let once = remove_duplicates(sample(), &params).unwrap();
        let twice = remove_duplicates(once.clone(), &params).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn remove_duplicates_keep_invalido_falla_al_despachar() {
        let res = remove_duplicates(sample(), &json!({ "keep": "invalid" }));
        assert!(res.is_err());
    }

    #[test]
    fn remove_duplicates_subset_desconocido_es_error() {
        let res = remove_duplicates(sample(), &json!({ "subset": ["NoExiste"] }));
        assert!(matches!(res, Err(OpError::UnknownColumn(_))));
    }

    /* =========================
       REMOVE_MISSING_ROWS
       ========================= */

    #[test]
    fn remove_missing_rows_any_tira_filas_con_algun_faltante() {
        let out = remove_missing_rows(sample(), &json!({})).unwrap();

        // filas 2 y 4 tienen faltantes en D/E
        assert_eq!(out.n_rows(), 4);
        for row in &out.rows {
            assert!(!row.iter().any(is_missing));
        }
    }

    #[test]
    fn remove_missing_rows_subset_solo_mira_esas_columnas() {
        // A no tiene faltantes: no se tira nada
        let out = remove_missing_rows(sample(), &json!({ "subset": ["A"] })).unwrap();
        assert_eq!(out.n_rows(), 6);

        // D sí: caen las filas 2 y 4
        let out = remove_missing_rows(sample(), &json!({ "subset": ["D"] })).unwrap();
        assert_eq!(out.n_rows(), 4);
    }

    #[test]
    fn remove_missing_rows_all_exige_que_falten_todas() {
        // ninguna fila tiene TODAS las columnas faltantes
        let out = remove_missing_rows(sample(), &json!({ "how": "all" })).unwrap();
        assert_eq!(out.n_rows(), 6);

        // pero restringiendo a D y E, las filas 2 y 4 caen
        let out =
            remove_missing_rows(sample(), &json!({ "subset": ["D", "E"], "how": "all" }))
                .unwrap();
        assert_eq!(out.n_rows(), 4);
    }

    #[test]
    fn remove_missing_rows_how_invalido_es_error() {
        let res = remove_missing_rows(sample(), &json!({ "how": "some" }));
        assert!(res.is_err());
    }

    /* =========================
       DROP_COLUMNS
       ========================= */

    #[test]
    fn drop_columns_borra_la_columna_y_sus_celdas() {
        let out = drop_columns(sample(), &json!({ "columns": ["B"] })).unwrap();

        assert_eq!(out.columns, vec!["A", "C", "D", "E"]);
        assert_eq!(out.rows[0], vec![json!(1), json!(24), json!(1.0), json!("a")]);
    }

    #[test]
    fn drop_columns_recorta_espacios_antes_de_comparar() {
        let out = drop_columns(sample(), &json!({ "columns": ["  B ", " C"] })).unwrap();
        assert_eq!(out.columns, vec!["A", "D", "E"]);
    }

    #[test]
    fn drop_columns_ignora_nombres_desconocidos() {
        let out = drop_columns(sample(), &json!({ "columns": ["NoExiste", "B"] })).unwrap();

        // solo B cae; el resto queda intacto
        assert_eq!(out.columns, vec!["A", "C", "D", "E"]);
        assert_eq!(out.n_rows(), 6);
    }

    #[test]
    fn drop_columns_sin_params_es_noop() {
        let out = drop_columns(sample(), &json!({})).unwrap();
        assert_eq!(out.n_cols(), 5);

        let out = drop_columns(sample(), &json!({ "columns": [] })).unwrap();
        assert_eq!(out.n_cols(), 5);
    }

    #[test]
    fn drop_columns_dos_veces_equivale_a_una() {
        let params = json!({ "columns": ["B", "C"] });
        let once = drop_columns(sample(), &params).unwrap();
        let twice = drop_columns(once.clone(), &params).unwrap();
        assert_eq!(once, twice);
    }

    /* =========================
       FILL_MISSING
       ========================= */

    #[test]
    fn fill_missing_constant_rellena_por_columna() {
        let params = json!({
            "method": "constant",
            "columns": { "D": 0.0, "E": "unknown" }
        });
        let out = fill_missing(sample(), &params).unwrap();

        for row in &out.rows {
            assert!(!is_missing(&row[3]));
            assert!(!is_missing(&row[4]));
        }
        assert_eq!(out.rows[2][3], json!(0.0));
        assert_eq!(out.rows[2][4], json!("unknown"));
        // los valores presentes no se tocan
        assert_eq!(out.rows[0][3], json!(1.0));
    }

    #[test]
    fn fill_missing_mean_usa_la_media_de_los_presentes() {
        // D = [1.0, 2.0, null, 4.0, null, 6.0] => media (1+2+4+6)/4 = 3.25
        let params = json!({ "method": "mean", "columns": ["D"] });
        let out = fill_missing(sample(), &params).unwrap();

        assert_eq!(out.rows[2][3], json!(3.25));
        assert_eq!(out.rows[4][3], json!(3.25));
        for row in &out.rows {
            assert!(!is_missing(&row[3]));
        }
    }

    #[test]
    fn fill_missing_mean_sin_valores_numericos_deja_la_columna() {
        // E es de texto: no hay media que calcular
        let params = json!({ "method": "mean", "columns": ["E"] });
        let out = fill_missing(sample(), &params).unwrap();
        assert!(is_missing(&out.rows[2][4]));
    }

    #[test]
    fn fill_missing_method_desconocido_es_noop() {
        let params = json!({ "method": "median", "columns": ["D"] });
        let out = fill_missing(sample(), &params).unwrap();
        assert_eq!(out, sample());
    }

    #[test]
    fn fill_missing_ignora_columnas_desconocidas() {
        let params = json!({ "method": "constant", "columns": { "Z": 1 } });
        let out = fill_missing(sample(), &params).unwrap();
        assert_eq!(out, sample());
    }

    /* =========================
       REGISTRY
       ========================= */

    #[test]
    fn registry_builtin_resuelve_las_cuatro_operaciones() {
        let reg = OpRegistry::builtin();
        for name in [
            "remove_duplicates",
            "remove_missing_rows",
            "drop_columns",
            "fill_missing",
        ] {
            assert!(reg.get(name).is_some(), "falta {name}");
        }
        assert!(reg.get("not_a_real_op").is_none());
    }

    #[test]
    fn registry_register_extiende_la_tabla() {
        fn identity(ds: Dataset, _params: &Value) -> Result<Dataset, OpError> {
            Ok(ds)
        }

        let mut reg = OpRegistry::builtin();
        reg.register("identity", identity);
        assert!(reg.get("identity").is_some());
    }
}
