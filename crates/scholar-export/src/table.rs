//! Tabla de análisis: una fila por artifact de análisis aceptado, con sus
//! columnas de procedencia.
use scholar_core::{AnalysisPayload, Artifact, PayloadSpec, QaOutcome};

use crate::errors::{ExportError, IntegrityReason};

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub unit_id: String,
    pub framework: String,
    /// En el orden de las dimensiones del framework.
    pub scores: Vec<f64>,
    pub qa_outcome: QaOutcome,
    pub artifact_hash: String,
    pub source_hash: String,
}

impl TableRow {
    /// Construye la fila verificando que el artifact trae todo lo que la
    /// tabla necesita.
    pub fn from_artifact(artifact: &Artifact, dimensions: &[String]) -> Result<Self, ExportError> {
        let hash = &artifact.content_hash;
        let payload = AnalysisPayload::from_payload(&artifact.payload).map_err(|e| {
                          ExportError::integrity(IntegrityReason::Undecodable { hash: hash.clone(),
                                                                                detail: e.to_string() })
                      })?;
        let mut scores = Vec::with_capacity(dimensions.len());
        for dim in dimensions {
            let v = payload.scores.get(dim).ok_or_else(|| {
                                                ExportError::integrity(IntegrityReason::MissingField { hash: hash.clone(),
                                                                                                       field: format!("scores.{dim}") })
                                            })?;
            scores.push(*v);
        }
        let source_hash = artifact.dependency_hashes.first().cloned().ok_or_else(|| {
                              ExportError::integrity(IntegrityReason::MissingField { hash: hash.clone(),
                                                                                     field: "dependency_hashes".into() })
                          })?;
        Ok(Self { unit_id: payload.unit_id,
                  framework: payload.framework,
                  scores,
                  qa_outcome: artifact.qa_outcome(),
                  artifact_hash: hash.clone(),
                  source_hash })
    }
}

pub fn header(dimensions: &[String]) -> Vec<String> {
    let mut h = vec!["unit_id".to_string(), "framework".to_string()];
    h.extend(dimensions.iter().cloned());
    h.extend(["qa_outcome", "artifact_hash", "source_hash"].map(String::from));
    h
}

pub fn render_csv(rows: &[TableRow], dimensions: &[String]) -> Result<Vec<u8>, ExportError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(header(dimensions))?;
    for row in rows {
        let mut record = vec![row.unit_id.clone(), row.framework.clone()];
        record.extend(row.scores.iter().map(|s| s.to_string()));
        record.push(row.qa_outcome.as_str().to_string());
        record.push(row.artifact_hash.clone());
        record.push(row.source_hash.clone());
        wtr.write_record(&record)?;
    }
    wtr.into_inner().map_err(|e| ExportError::Csv(e.to_string()))
}

/// Filas de datos de un CSV exportado: `(artifact_hash, source_hash)` por
/// fila.
pub fn read_provenance(bytes: &[u8]) -> Result<Vec<(String, String)>, ExportError> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let headers = rdr.headers()?.clone();
    let col = |name: &str| {
        headers.iter()
               .position(|h| h == name)
               .ok_or_else(|| ExportError::Csv(format!("missing column {name}")))
    };
    let (a, s) = (col("artifact_hash")?, col("source_hash")?);
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        out.push((rec.get(a).unwrap_or_default().to_string(), rec.get(s).unwrap_or_default().to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_has_provenance_columns() {
        let dims = vec!["a".to_string(), "b".to_string()];
        let rows = vec![TableRow { unit_id: "u1".into(),
                                   framework: "f".into(),
                                   scores: vec![1.5, 2.0],
                                   qa_outcome: QaOutcome::Pass,
                                   artifact_hash: "h1".into(),
                                   source_hash: "s1".into() }];
        let bytes = render_csv(&rows, &dims).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("unit_id,framework,a,b,qa_outcome,artifact_hash,source_hash\n"));
        assert!(text.contains("u1,f,1.5,2,pass,h1,s1"));
        assert_eq!(read_provenance(&bytes).unwrap(), vec![("h1".to_string(), "s1".to_string())]);
    }
}
