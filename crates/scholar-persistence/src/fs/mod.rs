//! Backend de ficheros: objetos direccionados por contenido y logs JSONL.
//!
//! Layout bajo la raíz:
//! - `objects/<2 hex>/<hash>.json`: un artifact por fichero, publicado con
//!   enlace duro (`persist_noclobber`), nunca reescrito.
//! - `records.jsonl`: log append-only de metadatos.
//! - `events/<run_id>.jsonl` y `events/runs.log`: eventos por run y orden de
//!   creación de los runs.
mod artifacts;
mod events;

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use artifacts::FsArtifactStore;
pub use events::FsEventStore;

use crate::error::PersistenceError;

/// Retry simple con backoff lineal para IO transitorio.
///
/// Política:
/// - Intentos extra: `retries`.
/// - Backoff: 15ms, 30ms, 45ms...
/// - Logs: se emite `warn!` por intento.
pub(crate) fn with_retry<F, T>(retries: u32, mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempts < retries => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Lee un fichero JSONL completo. Un fichero inexistente es un log vacío.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistenceError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line).map_err(|e| PersistenceError::Corrupt { path: format!("{}:{}", path.display(), i + 1),
                                                                                        detail: e.to_string() })?;
        out.push(item);
    }
    Ok(out)
}

/// Agrega una línea JSON y fuerza los datos a disco.
pub(crate) fn append_jsonl<T: Serialize>(path: &Path, item: &T) -> Result<(), PersistenceError> {
    let mut line = serde_json::to_string(item)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.sync_data()?;
    Ok(())
}
