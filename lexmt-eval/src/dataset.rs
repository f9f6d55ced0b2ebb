//! Test-set loading
//!
//! Reads the evaluation dataset JSON: an array of records with an id, a
//! source text, an optional reference, and the language pair either as a
//! combined `pair` string or as separate `src_lang`/`tgt_lang` codes.
//! Invalid records are skipped with a warning, never fatal.

use lexmt_common::types::{LanguagePair, Segment};
use lexmt_common::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Deserialize)]
struct RawRecord {
    id: Option<String>,
    source: Option<String>,
    #[serde(alias = "target")]
    reference: Option<String>,
    pair: Option<String>,
    src_lang: Option<String>,
    tgt_lang: Option<String>,
}

/// Load a dataset, returning the segments plus the number of skipped
/// records.
pub fn load_dataset(path: &Path, default_pair: LanguagePair) -> Result<(Vec<Segment>, usize)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read dataset {}: {e}", path.display())))?;
    let raw: Vec<RawRecord> = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("parse dataset {}: {e}", path.display())))?;

    let mut segments = Vec::new();
    let mut skipped = 0;

    for (idx, record) in raw.into_iter().enumerate() {
        let source = match record.source {
            Some(source) if !source.trim().is_empty() => source,
            _ => {
                warn!(index = idx, "Skipping dataset record without source text");
                skipped += 1;
                continue;
            }
        };

        let pair = match resolve_pair(&record.pair, &record.src_lang, &record.tgt_lang) {
            Ok(Some(pair)) => pair,
            Ok(None) => default_pair,
            Err(e) => {
                warn!(index = idx, error = %e, "Skipping dataset record with bad language pair");
                skipped += 1;
                continue;
            }
        };

        segments.push(Segment {
            id: record.id.unwrap_or_else(|| format!("sample-{idx}")),
            source,
            pair,
            reference: record.reference.filter(|r| !r.trim().is_empty()),
        });
    }

    if segments.is_empty() {
        return Err(Error::Config(format!(
            "dataset {} contains no usable records",
            path.display()
        )));
    }
    Ok((segments, skipped))
}

fn resolve_pair(
    pair: &Option<String>,
    src: &Option<String>,
    tgt: &Option<String>,
) -> Result<Option<LanguagePair>> {
    if let Some(pair) = pair {
        return Ok(Some(pair.parse()?));
    }
    match (src, tgt) {
        (Some(src), Some(tgt)) => Ok(Some(LanguagePair::new(src.parse()?, tgt.parse()?))),
        (None, None) => Ok(None),
        _ => Err(Error::Config(
            "record has only one of src_lang/tgt_lang".to_string(),
        )),
    }
}
