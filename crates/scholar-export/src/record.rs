//! ExportRecord: manifiesto del export y payload del artifact `export`.
use scholar_core::hashing::{content_hash_bytes, hash_value};
use scholar_core::{PayloadSpec, RunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TABLE_FILE: &str = "analysis_table.csv";
pub const REPORT_FILE: &str = "report.md";
pub const MANIFEST_FILE: &str = "export_manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub name: String,
    pub sha256: String,
    pub bytes: usize,
    /// Filas de datos (sin cabecera); sólo para la tabla.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

impl ExportedFile {
    pub fn new(name: &str, contents: &[u8], rows: Option<usize>) -> Self {
        Self { name: name.to_string(),
               sha256: content_hash_bytes(contents),
               bytes: contents.len(),
               rows }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub framework: String,
    pub files: Vec<ExportedFile>,
    /// Artifacts terminales cuyas cadenas se verificaron antes de escribir.
    pub upstream: Vec<String>,
    /// Artifacts flagged sin override (excluidos de la tabla).
    #[serde(default)]
    pub flagged: Vec<String>,
    /// SHA-256 del propio registro con este campo vacío.
    #[serde(default)]
    pub record_hash: String,
}

/// El manifiesto es también el payload del artifact de etapa `export`.
pub type ExportPayload = ExportRecord;

impl ExportRecord {
    pub fn compute_record_hash(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.record_hash = String::new();
        match serde_json::to_value(&unsigned) {
            Ok(v) => hash_value(&v),
            Err(_) => String::new(),
        }
    }

    pub fn seal(mut self) -> Self {
        self.record_hash = self.compute_record_hash();
        self
    }

    pub fn is_sealed(&self) -> bool {
        !self.record_hash.is_empty() && self.record_hash == self.compute_record_hash()
    }

    pub fn file(&self, name: &str) -> Option<&ExportedFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

impl PayloadSpec for ExportRecord {
    const KIND: &'static str = "export";

    fn validate(&self) -> Result<(), String> {
        if self.files.is_empty() {
            return Err("export without files".into());
        }
        if !self.is_sealed() {
            return Err("record self-hash does not match".into());
        }
        Ok(())
    }
}
