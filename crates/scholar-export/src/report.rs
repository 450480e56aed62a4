//! Reporte Markdown con pie de procedencia.
use std::fmt::{self, Write};

use scholar_core::constants::ENGINE_VERSION;
use scholar_core::{PipelineRun, StatisticsPayload, SynthesisPayload};

use crate::table::TableRow;

pub struct ReportInput<'a> {
    pub run: &'a PipelineRun,
    pub framework: &'a str,
    pub rows: &'a [TableRow],
    pub statistics: Option<(&'a str, &'a StatisticsPayload)>,
    pub synthesis: Option<(&'a str, &'a SynthesisPayload)>,
    pub upstream: &'a [String],
    pub flagged: &'a [String],
}

pub fn render(input: &ReportInput<'_>) -> Result<String, fmt::Error> {
    let run = input.run;
    let status = run.effective_status();
    let mut out = String::new();
    match input.synthesis {
        Some((_, s)) => {
            writeln!(out, "# {}\n", s.title)?;
            writeln!(out, "{}\n", s.narrative.trim_end())?;
        }
        None => {
            writeln!(out, "# {} analysis report\n", input.framework)?;
            match input.statistics {
                Some((_, stats)) => {
                    writeln!(out, "| dimension | n | mean | sd | min | max |")?;
                    writeln!(out, "|---|---|---|---|---|---|")?;
                    for (dim, d) in &stats.dimensions {
                        writeln!(out,
                                 "| {dim} | {} | {:.3} | {:.3} | {:.3} | {:.3} |",
                                 d.n, d.mean, d.std_dev, d.min, d.max)?;
                    }
                    writeln!(out,
                             "\nConfidence: {:?} ({}, n={})\n",
                             stats.confidence.level, stats.confidence.method, stats.confidence.sample_size)?;
                }
                None => {
                    writeln!(out, "No statistics were produced for this run; see the analysis table.\n")?;
                }
            }
        }
    }
    if let Some((_, stats)) = input.statistics {
        for ex in &stats.excluded_units {
            writeln!(out, "- excluded `{}`: {}", ex.unit_id, ex.reason)?;
        }
    }
    if status != scholar_core::RunStatus::Complete {
        writeln!(out, "\n> Run status: **{status}**. Some stages or units did not complete.")?;
        for r in &run.rejected {
            writeln!(out, "> - {} `{}` rejected ({:?}): {}", r.stage, r.unit_id, r.class, r.reason)?;
        }
        for h in input.flagged {
            writeln!(out, "> - flagged for review: `{h}`")?;
        }
    }

    writeln!(out, "\n---\n\n## Provenance\n")?;
    writeln!(out, "- run: `{}`", run.id)?;
    if let Some(parent) = run.parent {
        writeln!(out, "- branched from: `{parent}`")?;
    }
    writeln!(out, "- status: {status}")?;
    writeln!(out, "- engine: {ENGINE_VERSION}")?;
    writeln!(out, "- rows: {}", input.rows.len())?;
    if let Some((h, _)) = input.statistics {
        writeln!(out, "- statistics: `{h}`")?;
    }
    if let Some((h, _)) = input.synthesis {
        writeln!(out, "- synthesis: `{h}`")?;
    }
    for o in &run.overrides {
        writeln!(out, "- override `{}` by {}: {}", o.content_hash, o.operator, o.note)?;
    }
    writeln!(out, "- upstream artifacts:")?;
    for h in input.upstream {
        writeln!(out, "  - `{h}`")?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholar_core::repo::RejectedUnit;
    use scholar_core::{ErrorClass, RunStatus, Stage};
    use uuid::Uuid;

    #[test]
    fn partial_run_report_lists_rejections_flags_and_provenance() {
        let run = PipelineRun { id: Uuid::new_v4(),
                                parent: None,
                                config_hash: "cfg".into(),
                                unit_count: 2,
                                stages: Vec::new(),
                                artifacts: Vec::new(),
                                rejected: vec![RejectedUnit { stage: Stage::Analysis,
                                                              unit_id: "u2".into(),
                                                              class: ErrorClass::Transient,
                                                              reason: "retries exhausted".into() }],
                                overrides: Vec::new(),
                                branches: Vec::new(),
                                retries: 2,
                                cancelled: None,
                                status: RunStatus::Partial };
        let upstream = vec!["aaa".to_string()];
        let flagged = vec!["bbb".to_string()];
        let text = render(&ReportInput { run: &run,
                                         framework: "stance",
                                         rows: &[],
                                         statistics: None,
                                         synthesis: None,
                                         upstream: &upstream,
                                         flagged: &flagged }).unwrap();
        assert!(text.starts_with("# stance analysis report\n"));
        assert!(text.contains("No statistics were produced"));
        assert!(text.contains("> Run status: **partial**"));
        assert!(text.contains("`u2` rejected (Transient): retries exhausted"));
        assert!(text.contains("> - flagged for review: `bbb`"));
        assert!(text.contains("- rows: 0"));
        assert!(text.ends_with("- upstream artifacts:\n  - `aaa`\n"));
    }
}
