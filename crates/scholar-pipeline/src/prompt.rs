//! Plantillas mínimas de prompt. El contenido analítico real lo define el
//! framework; aquí sólo se fija el contrato de salida JSON.
use scholar_core::{FrameworkSpec, IngestPayload, StatisticsPayload};

pub fn analysis_prompt(framework: &FrameworkSpec, doc: &IngestPayload) -> String {
    let dims = framework.dimensions.join(", ");
    format!("Framework: {} v{}\nDimensions: {dims}\nScore range: [{}, {}]\n\
             Answer with a JSON object {{\"scores\": {{dimension: number}}, \"derived\": {{dimension: score / sum of scores}}, \
             \"rationale\": string}}.\n\nDocument {}{}:\n{}\n",
            framework.name,
            framework.version,
            framework.score_min,
            framework.score_max,
            doc.unit_id,
            doc.title.as_deref().map(|t| format!(" ({t})")).unwrap_or_default(),
            doc.text)
}

pub fn synthesis_prompt(framework: &FrameworkSpec, statistics_hash: &str, stats: &StatisticsPayload) -> String {
    let mut table = String::new();
    for (dim, d) in &stats.dimensions {
        table.push_str(&format!("- {dim}: n={} mean={:.3} sd={:.3} range=[{:.3}, {:.3}]\n",
                                d.n, d.mean, d.std_dev, d.min, d.max));
    }
    format!("Write a Markdown research synthesis for framework {} over {} documents.\n\
             Statistics artifact {statistics_hash}:\n{table}\
             Cite artifacts only by the hashes given above.\n",
            framework.name,
            stats.included_units.len())
}

/// Hashes SHA-256 (64 hex) citados en un texto, sin duplicados y en orden de
/// aparición.
pub fn cited_hashes(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in text.split(|c: char| !c.is_ascii_hexdigit()) {
        if token.len() == 64 && token.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            let t = token.to_string();
            if !out.contains(&t) {
                out.push(t);
            }
        }
    }
    out
}
