//! Run artifact persistence
//!
//! Every run writes a timestamped directory containing one document per
//! ablation, a run summary with aggregates and statistics, and, when
//! intermediate saving is on, supplementary documents holding only the
//! terminology-only and terminology+syntax predictions.

use crate::runner::AblationResult;
use chrono::Utc;
use lexmt_common::Result;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Writer rooted at `<output_dir>/run_<timestamp>/`
pub struct RunArtifactWriter {
    run_id: String,
    run_dir: PathBuf,
}

impl RunArtifactWriter {
    pub fn create(output_dir: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = output_dir.join(format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self { run_id, run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.run_dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        tracing::info!(path = %path.display(), "Artifact written");
        Ok(path)
    }

    /// One document per ablation: config plus ordered sample records.
    pub fn write_ablation(&self, result: &AblationResult) -> Result<PathBuf> {
        self.write_json(&format!("{}.json", result.name), result)
    }

    /// Supplementary documents with only the intermediate predictions of
    /// the named ablation. Returns the written paths.
    pub fn write_intermediates(&self, result: &AblationResult) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (key, suffix) in [
            ("terminology", "terminology_only"),
            ("terminology_syntax", "terminology_syntax"),
        ] {
            let records: Vec<_> = result
                .results
                .iter()
                .filter_map(|sample| {
                    sample.intermediate.as_ref().and_then(|i| i.get(key)).map(
                        |prediction| {
                            json!({
                                "sample_id": sample.sample_id,
                                "source": sample.source,
                                "reference": sample.reference,
                                "prediction": prediction,
                            })
                        },
                    )
                })
                .collect();
            if records.is_empty() {
                continue;
            }
            written.push(self.write_json(
                &format!("{}_{}.json", result.name, suffix),
                &records,
            )?);
        }
        Ok(written)
    }

    /// Run summary: aggregates, statistics, and warnings per ablation.
    pub fn write_summary(&self, dataset: &Path, ablations: &[AblationResult]) -> Result<PathBuf> {
        let summary = json!({
            "run_id": self.run_id,
            "created_at": Utc::now().to_rfc3339(),
            "dataset": dataset.display().to_string(),
            "ablations": ablations.iter().map(|a| {
                json!({
                    "name": a.name,
                    "samples": a.results.len(),
                    "successes": a.results.iter().filter(|r| r.success).count(),
                    "aggregate": a.aggregate,
                    "stats": a.stats,
                    "warnings": a.warnings,
                })
            }).collect::<Vec<_>>(),
        });
        self.write_json("summary.json", &summary)
    }
}
