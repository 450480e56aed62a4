//! Capa 1: validación de la entrada antes de gastar una llamada LLM.
use scholar_core::{FrameworkSpec, LayerDiagnostic, QaLayer, QaThresholds};

pub fn check_input(text: &str, framework: &FrameworkSpec, qa: &QaThresholds) -> LayerDiagnostic {
    const L: QaLayer = QaLayer::InputValidation;
    let problems = framework.problems();
    if !problems.is_empty() {
        return LayerDiagnostic::fail(L, format!("framework incompatible: {}", problems.join("; ")));
    }
    if text.trim().is_empty() {
        return LayerDiagnostic::fail(L, "input text is empty");
    }
    if text.contains('\0') || text.contains('\u{FFFD}') {
        return LayerDiagnostic::fail(L, "input text contains NUL or replacement characters (encoding damage)");
    }
    let chars = text.chars().count();
    if chars < qa.min_text_chars {
        return LayerDiagnostic::fail(L, format!("input too short: {chars} < {} chars", qa.min_text_chars));
    }
    if chars > qa.max_text_chars {
        return LayerDiagnostic::fail(L, format!("input too long: {chars} > {} chars", qa.max_text_chars));
    }
    LayerDiagnostic::pass(L, format!("{chars} chars"))
}
