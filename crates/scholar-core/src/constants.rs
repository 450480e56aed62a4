//! Constantes del núcleo.
//!
//! Agrupa valores estáticos que participan en el cálculo de fingerprints y en
//! el formato persistido de los metadatos. Cambiar `ENGINE_VERSION` invalida
//! la caché de etapas (forma parte del input del fingerprint).

/// Versión lógica del orquestador. Se incluye en cada fingerprint de etapa
/// para que un cambio incompatible del motor no reutilice artifacts previos.
pub const ENGINE_VERSION: &str = "SF1.0";

/// Versión del formato de los registros de metadatos en disco.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Nombres de campo del registro de metadatos. Son contrato externo: los
/// lectores (export, auditoría, backends) y los escritores deben usar
/// exactamente estos nombres.
pub mod fields {
    pub const CONTENT_HASH: &str = "content_hash";
    pub const STAGE: &str = "stage";
    pub const DEPENDENCY_HASHES: &str = "dependency_hashes";
    pub const PRODUCER_VERSION: &str = "producer_version";
    pub const CREATED_AT: &str = "created_at";
    pub const QA_RESULT: &str = "qa_result";
    pub const INPUT_FINGERPRINT: &str = "input_fingerprint";

    /// Todos los campos obligatorios del registro, en orden de documentación.
    pub const REQUIRED: [&str; 6] = [CONTENT_HASH, STAGE, DEPENDENCY_HASHES, PRODUCER_VERSION, CREATED_AT, QA_RESULT];
}
