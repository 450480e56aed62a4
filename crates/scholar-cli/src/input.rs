//! Carga del corpus de entrada.
//!
//! Acepta ficheros sueltos o directorios (no recursivo, orden por nombre):
//! - `*.json`: un `IngestPayload` serializado.
//! - cualquier otro fichero: texto plano; `unit_id` = nombre sin extensión.
use std::fs;
use std::path::{Path, PathBuf};

use scholar_core::IngestPayload;

use crate::CliError;

pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<IngestPayload>, CliError> {
    let mut files = Vec::new();
    for p in paths {
        if p.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(p).map_err(|e| CliError::Input(format!("{}: {e}", p.display())))?
                                                           .filter_map(|e| e.ok().map(|e| e.path()))
                                                           .filter(|p| p.is_file())
                                                           .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(p.clone());
        }
    }
    files.iter().map(|f| load_one(f)).collect()
}

fn load_one(path: &Path) -> Result<IngestPayload, CliError> {
    let raw = fs::read_to_string(path).map_err(|e| CliError::Input(format!("{}: {e}", path.display())))?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        return serde_json::from_str(&raw).map_err(|e| CliError::Input(format!("{}: {e}", path.display())));
    }
    let unit_id = path.file_stem()
                      .and_then(|s| s.to_str())
                      .ok_or_else(|| CliError::Input(format!("{}: file name is not UTF-8", path.display())))?;
    Ok(IngestPayload { unit_id: unit_id.to_string(),
                       title: None,
                       text: raw })
}
