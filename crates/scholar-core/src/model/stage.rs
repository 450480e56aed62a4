use serde::{Deserialize, Serialize};
use std::fmt;

/// Etapa productora de un artifact.
///
/// El orden de declaración es el orden del pipeline; `Ord` se apoya en él.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Analysis,
    Statistics,
    Synthesis,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Ingest, Stage::Analysis, Stage::Statistics, Stage::Synthesis, Stage::Export];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Analysis => "analysis",
            Stage::Statistics => "statistics",
            Stage::Synthesis => "synthesis",
            Stage::Export => "export",
        }
    }

    /// Etapa cuyos artifacts son entradas declaradas de esta etapa.
    ///
    /// `Export` no declara una única entrada: consume lo que haya completado
    /// el run (degradación), por eso devuelve `None` igual que `Ingest`.
    pub fn declared_input(&self) -> Option<Stage> {
        match self {
            Stage::Ingest => None,
            Stage::Analysis => Some(Stage::Ingest),
            Stage::Statistics => Some(Stage::Analysis),
            Stage::Synthesis => Some(Stage::Statistics),
            Stage::Export => None,
        }
    }

    /// Etapas cuyo fallo no aborta el run: se degradan y el export continúa.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Stage::Statistics | Stage::Synthesis)
    }

    /// Etapas que producen un artifact por unidad de entrada (documento).
    pub fn is_per_unit(&self) -> bool {
        matches!(self, Stage::Ingest | Stage::Analysis)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL.iter()
                  .copied()
                  .find(|st| st.as_str() == s)
                  .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}
