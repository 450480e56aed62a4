//! Capa 2: validación de la respuesta cruda del LLM.
//!
//! Convierte texto no tipado en un `AnalysisPayload`. Cualquier error aquí
//! significa que la respuesta nunca llega al store.
use std::collections::BTreeMap;

use scholar_core::{AnalysisPayload, FrameworkSpec, LayerDiagnostic, QaLayer, SynthesisPayload};
use serde_json::{Map, Value};

const TRUNCATION_MARKERS: [&str; 2] = ["[truncated]", "[TRUNCATED]"];

/// Motivo de truncamiento, si la respuesta parece cortada.
pub fn truncation_reason(text: &str, finish_reason: Option<&str>) -> Option<String> {
    if finish_reason == Some("length") {
        return Some("finish_reason=length".into());
    }
    if let Some(m) = TRUNCATION_MARKERS.iter().find(|m| text.contains(*m)) {
        return Some(format!("marker {m}"));
    }
    let trimmed = text.trim_end();
    if trimmed.ends_with("...") || trimmed.ends_with('\u{2026}') {
        return Some("trailing ellipsis".into());
    }
    None
}

/// Extrae el JSON de la respuesta: contenido de un bloque ``` (con o sin
/// etiqueta de lenguaje) o el tramo entre la primera `{` y la última `}`.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(start) = raw.find("```") {
        let after = &raw[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let open = raw.find('{')?;
    let close = raw.rfind('}')?;
    (close > open).then(|| &raw[open..=close])
}

fn numeric_map(obj: &Map<String, Value>, field: &str, framework: &FrameworkSpec) -> Result<BTreeMap<String, f64>, String> {
    let map = obj.get(field)
                 .and_then(Value::as_object)
                 .ok_or_else(|| format!("`{field}` missing or not an object"))?;
    let mut out = BTreeMap::new();
    for dim in &framework.dimensions {
        let v = map.get(dim).ok_or_else(|| format!("`{field}` lacks dimension {dim}"))?;
        let n = v.as_f64().ok_or_else(|| format!("`{field}.{dim}` is not numeric"))?;
        if !n.is_finite() {
            return Err(format!("`{field}.{dim}` is not finite"));
        }
        out.insert(dim.clone(), n);
    }
    if let Some(extra) = map.keys().find(|k| !framework.dimensions.contains(k)) {
        return Err(format!("`{field}` has unknown dimension {extra}"));
    }
    Ok(out)
}

/// Parsea y valida una respuesta de análisis.
pub fn parse_analysis(unit_id: &str,
                      raw: &str,
                      finish_reason: Option<&str>,
                      framework: &FrameworkSpec)
                      -> Result<AnalysisPayload, String> {
    if let Some(reason) = truncation_reason(raw, finish_reason) {
        return Err(format!("truncated response ({reason})"));
    }
    let body = extract_json(raw).ok_or("no JSON object in response")?;
    let value: Value = serde_json::from_str(body).map_err(|e| format!("malformed JSON: {e}"))?;
    let obj = value.as_object().ok_or("response JSON is not an object")?;
    let scores = numeric_map(obj, "scores", framework)?;
    if let Some((dim, v)) = scores.iter().find(|(_, v)| **v < framework.score_min || **v > framework.score_max) {
        return Err(format!("score {dim}={v} outside [{}, {}]", framework.score_min, framework.score_max));
    }
    let derived = numeric_map(obj, "derived", framework)?;
    let rationale = obj.get("rationale").and_then(Value::as_str).map(str::to_string);
    Ok(AnalysisPayload { unit_id: unit_id.to_string(),
                         framework: framework.name.clone(),
                         framework_version: framework.version.clone(),
                         scores,
                         derived,
                         rationale })
}

pub fn analysis_diagnostic(result: &Result<AnalysisPayload, String>) -> LayerDiagnostic {
    match result {
        Ok(p) => LayerDiagnostic::pass(QaLayer::ResponseValidation, format!("{} dimensions parsed", p.scores.len())),
        Err(e) => LayerDiagnostic::fail(QaLayer::ResponseValidation, e.clone()),
    }
}

/// Validación estructural de una narrativa de síntesis.
pub fn check_synthesis(synthesis: &SynthesisPayload, finish_reason: Option<&str>, known: &[String]) -> LayerDiagnostic {
    const L: QaLayer = QaLayer::ResponseValidation;
    if synthesis.narrative.trim().is_empty() {
        return LayerDiagnostic::fail(L, "narrative is empty");
    }
    if let Some(reason) = truncation_reason(&synthesis.narrative, finish_reason) {
        return LayerDiagnostic::fail(L, format!("truncated narrative ({reason})"));
    }
    if !known.contains(&synthesis.statistics_hash) {
        return LayerDiagnostic::fail(L, format!("unknown statistics hash {}", synthesis.statistics_hash));
    }
    if let Some(h) = synthesis.cited_hashes.iter().find(|h| !known.contains(h)) {
        return LayerDiagnostic::fail(L, format!("narrative cites unknown artifact {h}"));
    }
    LayerDiagnostic::pass(L, format!("{} chars, {} citations", synthesis.narrative.len(), synthesis.cited_hashes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framework() -> FrameworkSpec {
        FrameworkSpec { name: "f".into(),
                        version: "1".into(),
                        dimensions: vec!["a".into(), "b".into()],
                        score_min: 0.0,
                        score_max: 10.0,
                        default_score: 0.0 }
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"scores\":{\"a\":2,\"b\":6},\"derived\":{\"a\":0.25,\"b\":0.75},\"rationale\":\"r\"}\n```\n";
        let p = parse_analysis("u1", raw, Some("stop"), &framework()).unwrap();
        assert_eq!(p.scores["b"], 6.0);
        assert_eq!(p.rationale.as_deref(), Some("r"));
        assert_eq!(p.framework, "f");
    }

    #[test]
    fn rejects_truncation_and_malformed_output() {
        let fw = framework();
        let ok = r#"{"scores":{"a":1,"b":2},"derived":{"a":0.3,"b":0.7}}"#;
        assert!(parse_analysis("u", ok, Some("length"), &fw).unwrap_err().contains("truncated"));
        assert!(parse_analysis("u", "{\"scores\": {\"a\": 1, ...", None, &fw).is_err());
        assert!(parse_analysis("u", "analysis [truncated]", None, &fw).is_err());
        assert!(parse_analysis("u", "I cannot help with that", None, &fw).unwrap_err().contains("no JSON"));
    }

    #[test]
    fn rejects_missing_non_numeric_and_out_of_range_scores() {
        let fw = framework();
        let missing = r#"{"scores":{"a":1},"derived":{"a":1,"b":0}}"#;
        assert!(parse_analysis("u", missing, None, &fw).unwrap_err().contains("lacks dimension b"));
        let text = r#"{"scores":{"a":"high","b":2},"derived":{"a":0.5,"b":0.5}}"#;
        assert!(parse_analysis("u", text, None, &fw).unwrap_err().contains("not numeric"));
        let range = r#"{"scores":{"a":11,"b":2},"derived":{"a":0.8,"b":0.2}}"#;
        assert!(parse_analysis("u", range, None, &fw).unwrap_err().contains("outside"));
        let no_derived = r#"{"scores":{"a":1,"b":2}}"#;
        assert!(parse_analysis("u", no_derived, None, &fw).unwrap_err().contains("derived"));
    }

    #[test]
    fn synthesis_must_cite_known_hashes() {
        let s = SynthesisPayload { title: "t".into(),
                                   narrative: "Findings.".into(),
                                   statistics_hash: "s1".into(),
                                   cited_hashes: vec!["a1".into()] };
        let known = vec!["s1".to_string(), "a1".to_string()];
        assert!(!check_synthesis(&s, None, &known).is_fail());
        assert!(check_synthesis(&s, None, &known[..1]).is_fail());
        assert!(check_synthesis(&s, Some("length"), &known).is_fail());
    }
}
