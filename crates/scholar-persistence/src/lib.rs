//! scholar-persistence
//!
//! Backend de ficheros para `ArtifactStore` y `EventStore`: el store
//! sobrevive entre procesos y la CLI puede consultar, exportar y ramificar
//! runs ya cerrados.
//!
//! Módulos:
//! - `fs`: objetos direccionados por contenido y logs JSONL append-only.
//! - `config`: carga de configuración desde el entorno / `.env`.
//! - `error`: errores de IO y su traducción a `StoreError`.

pub mod config;
pub mod error;
pub mod fs;

pub use config::{init_dotenv, StoreConfig};
pub use error::PersistenceError;
pub use fs::{FsArtifactStore, FsEventStore};
