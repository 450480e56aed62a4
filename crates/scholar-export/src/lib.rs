//! scholar-export: materialización verificada de un run (tabla CSV, reporte
//! Markdown y manifiesto) y re-verificación de exports existentes.
pub mod errors;
pub mod record;
pub mod report;
pub mod table;
pub mod validator;

pub use errors::{ExportError, IntegrityReason};
pub use record::{ExportPayload, ExportRecord, ExportedFile, MANIFEST_FILE, REPORT_FILE, TABLE_FILE};
pub use validator::ExportValidator;
