use serde_json::Value;
use std::fs;
use std::path::Path;

/// Dataset tabular completo en memoria (sin chunking: el tamaño de la
/// entrada está acotado por la RAM disponible).
///
/// Cada fila es un vector de celdas alineado con `columns`. Una celda
/// faltante se representa como JSON null; es el único valor "missing".
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Índice de la columna con ese nombre, si existe.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }
}

/// true si la celda cuenta como valor faltante.
pub fn is_missing(cell: &Value) -> bool {
    cell.is_null()
}

/// Celda CSV -> JSON con inferencia de tipo:
/// vacío => null, entero => i64, decimal => f64, resto => string.
fn parse_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

/// JSON -> celda CSV. Null vuelve a ser la celda vacía.
fn render_cell(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Lee un CSV completo a memoria. Primera línea = encabezados.
/// Limpia BOM por si el archivo viene de Excel/Windows.
pub fn read_csv(path: impl AsRef<Path>) -> Result<Dataset, csv::Error> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut ds = Dataset::new(columns);

    for record in reader.records() {
        let record = record?;
        let row: Vec<Value> = record.iter().map(parse_cell).collect();
        ds.rows.push(row);
    }

    Ok(ds)
}

/// Escribe el dataset como CSV, creando los directorios intermedios.
pub fn write_csv(ds: &Dataset, path: impl AsRef<Path>) -> Result<(), csv::Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&ds.columns)?;

    for row in &ds.rows {
        let rendered: Vec<String> = row.iter().map(render_cell).collect();
        writer.write_record(&rendered)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("dataset_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn read_csv_infiere_tipos_y_detecta_faltantes() {
        let tmp = temp_dir("infer");
        let path = tmp.join("data.csv");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "nombre,edad,saldo").unwrap();
        writeln!(f, "Ana,30,1.5").unwrap();
        writeln!(f, "Bob,,x2").unwrap();

        let ds = read_csv(&path).unwrap();

        assert_eq!(ds.columns, vec!["nombre", "edad", "saldo"]);
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.rows[0], vec![json!("Ana"), json!(30), json!(1.5)]);
        assert_eq!(ds.rows[1][0], json!("Bob"));
        assert!(is_missing(&ds.rows[1][1]));
        assert_eq!(ds.rows[1][2], json!("x2"));
    }

    #[test]
    fn read_csv_limpia_bom_del_encabezado() {
        let tmp = temp_dir("bom");
        let path = tmp.join("data.csv");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "\u{feff}id,valor\n1,a\n").unwrap();

        let ds = read_csv(&path).unwrap();
        assert_eq!(ds.columns, vec!["id", "valor"]);
    }

    #[test]
    fn read_csv_respeta_campos_con_comillas() {
        let tmp = temp_dir("quoted");
        let path = tmp.join("data.csv");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "id,text").unwrap();
        writeln!(f, "1,\"hola, mundo\"").unwrap();

        let ds = read_csv(&path).unwrap();
        assert_eq!(ds.rows[0][1], json!("hola, mundo"));
    }

    #[test]
    fn write_csv_roundtrip_conserva_contenido() {
        let tmp = temp_dir("roundtrip");
        let in_path = tmp.join("in.csv");
        let mut f = fs::File::create(&in_path).unwrap();
        writeln!(f, "a,b,c").unwrap();
        writeln!(f, "1,x,2.5").unwrap();
        writeln!(f, ",y,").unwrap();

        let ds = read_csv(&in_path).unwrap();

        let out_path = tmp.join("sub").join("out.csv");
        write_csv(&ds, &out_path).unwrap();

        // misma estructura tras releer lo escrito
        let back = read_csv(&out_path).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn write_csv_deja_celda_vacia_para_null() {
        let tmp = temp_dir("nulls");
        let mut ds = Dataset::new(vec!["a".into(), "b".into()]);
        ds.rows.push(vec![Value::Null, json!("z")]);

        let out = tmp.join("out.csv");
        write_csv(&ds, &out).unwrap();

        let content = fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("a,b"));
        assert_eq!(lines.next(), Some(",z"));
    }

    #[test]
    fn read_csv_con_archivo_inexistente_devuelve_error() {
        let tmp = temp_dir("missing");
        let res = read_csv(tmp.join("no_existe.csv"));
        assert!(res.is_err());
    }
}
