//! Configuración del backend de ficheros desde variables de entorno.
//! Convención `SCHOLAR_*`; un `.env` en el directorio actual se carga una vez.

use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

pub const DEFAULT_STORE_DIR: &str = ".scholar";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Raíz del store: `objects/`, `records.jsonl` y `events/`.
    pub root: PathBuf,
    /// Reintentos ante errores de IO transitorios.
    pub io_retries: u32,
    /// Filtro de logging por defecto (sobrescrito por `RUST_LOG`).
    pub log_filter: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { root: PathBuf::from(DEFAULT_STORE_DIR),
               io_retries: 3,
               log_filter: DEFAULT_LOG_FILTER.to_string() }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let defaults = Self::default();
        let root = env::var("SCHOLAR_STORE_DIR").map(PathBuf::from).unwrap_or(defaults.root);
        let io_retries = env::var("SCHOLAR_IO_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.io_retries);
        let log_filter = env::var("SCHOLAR_LOG").unwrap_or(defaults.log_filter);
        Self { root, io_retries, log_filter }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
