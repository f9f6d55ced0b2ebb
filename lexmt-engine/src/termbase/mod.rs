//! Persistent termbase
//!
//! SQLite-backed store of source-term -> target-term entries with
//! definitions, contexts, and occurrence counts. (source_form, target_form,
//! language pair) is unique: a second translation for the same source form
//! is stored as an alternative entry, never a replacement. Ingest is
//! structurally idempotent; repeated ingests aggregate counts and contexts
//! without creating new rows.

pub mod lookup;

use lexmt_common::types::{LanguagePair, TermEntry, MAX_TERM_CONTEXTS};
use lexmt_common::{Error, Result};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

pub use lookup::{char_similarity, normalize_term, TAU_FUZZY, TAU_VECTOR};

/// Outcome of one ingest call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub merged: usize,
}

/// Per-pair and per-domain entry counts
#[derive(Debug, Default, Clone)]
pub struct TermbaseStats {
    pub total: i64,
    pub by_pair: BTreeMap<String, i64>,
    pub by_domain: BTreeMap<String, i64>,
}

/// Termbase store over a SQLite pool
#[derive(Clone)]
pub struct TermStore {
    pool: Pool<Sqlite>,
}

impl TermStore {
    /// Open (creating if needed) the termbase at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to termbase: {}", db_url);
        let pool = SqlitePool::connect(&db_url).await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS terms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_form TEXT NOT NULL,
                source_norm TEXT NOT NULL,
                target_form TEXT NOT NULL,
                src_lang TEXT NOT NULL,
                tgt_lang TEXT NOT NULL,
                definition TEXT,
                domain TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 1.0,
                occurrence_count INTEGER NOT NULL DEFAULT 1,
                contexts TEXT NOT NULL DEFAULT '[]',
                UNIQUE(source_form, target_form, src_lang, tgt_lang)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_terms_norm
             ON terms(source_norm, src_lang, tgt_lang)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert entries. Existing (source_form, target_form, pair) rows get
    /// their occurrence_count incremented, confidence raised to the max of
    /// both, and contexts unioned up to [`MAX_TERM_CONTEXTS`].
    pub async fn ingest(&self, entries: &[TermEntry]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for entry in entries {
            if entry.source_form.trim().is_empty() || entry.target_form.trim().is_empty() {
                tracing::warn!(
                    source = %entry.source_form,
                    "Skipping term entry with empty form"
                );
                continue;
            }

            let norm = normalize_term(&entry.source_form);
            let existing = sqlx::query(
                "SELECT id, occurrence_count, confidence, contexts FROM terms
                 WHERE source_form = ? AND target_form = ? AND src_lang = ? AND tgt_lang = ?",
            )
            .bind(&entry.source_form)
            .bind(&entry.target_form)
            .bind(entry.pair.src.code())
            .bind(entry.pair.tgt.code())
            .fetch_optional(&self.pool)
            .await?;

            match existing {
                Some(row) => {
                    let id: i64 = row.get("id");
                    let count: i64 = row.get("occurrence_count");
                    let confidence: f64 = row.get("confidence");
                    let contexts_json: String = row.get("contexts");

                    let mut contexts: Vec<String> =
                        serde_json::from_str(&contexts_json).unwrap_or_default();
                    for ctx in &entry.contexts {
                        if contexts.len() >= MAX_TERM_CONTEXTS {
                            break;
                        }
                        if !ctx.is_empty() && !contexts.contains(ctx) {
                            contexts.push(ctx.clone());
                        }
                    }

                    sqlx::query(
                        "UPDATE terms SET occurrence_count = ?, confidence = ?, contexts = ?
                         WHERE id = ?",
                    )
                    .bind(count + entry.occurrence_count.max(1))
                    .bind(confidence.max(entry.confidence))
                    .bind(serde_json::to_string(&contexts)?)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                    report.merged += 1;
                }
                None => {
                    let contexts: Vec<&String> = entry
                        .contexts
                        .iter()
                        .filter(|c| !c.is_empty())
                        .take(MAX_TERM_CONTEXTS)
                        .collect();
                    sqlx::query(
                        "INSERT INTO terms (source_form, source_norm, target_form, src_lang,
                                            tgt_lang, definition, domain, confidence,
                                            occurrence_count, contexts)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&entry.source_form)
                    .bind(&norm)
                    .bind(&entry.target_form)
                    .bind(entry.pair.src.code())
                    .bind(entry.pair.tgt.code())
                    .bind(&entry.definition)
                    .bind(&entry.domain)
                    .bind(entry.confidence)
                    .bind(entry.occurrence_count.max(1))
                    .bind(serde_json::to_string(&contexts)?)
                    .execute(&self.pool)
                    .await?;
                    report.inserted += 1;
                }
            }
        }

        tracing::info!(
            inserted = report.inserted,
            merged = report.merged,
            "Termbase ingest complete"
        );
        Ok(report)
    }

    /// All entries for a language pair, for export or debugging.
    pub async fn export(&self, pair: LanguagePair) -> Result<Vec<TermEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM terms WHERE src_lang = ? AND tgt_lang = ?
             ORDER BY source_form, confidence DESC",
        )
        .bind(pair.src.code())
        .bind(pair.tgt.code())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_entry(row, pair)).collect()
    }

    /// Exact matches on the normalized source form.
    pub(crate) async fn exact_matches(
        &self,
        norm: &str,
        pair: LanguagePair,
        k: usize,
    ) -> Result<Vec<TermEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM terms
             WHERE source_norm = ? AND src_lang = ? AND tgt_lang = ?
             ORDER BY confidence DESC, occurrence_count DESC
             LIMIT ?",
        )
        .bind(norm)
        .bind(pair.src.code())
        .bind(pair.tgt.code())
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_entry(row, pair)).collect()
    }

    /// Candidate rows for the fuzzy pass: everything for the pair except the
    /// given normalized form. The termbase is small enough (thousands of
    /// rows) that scoring in process beats expressing similarity in SQL.
    pub(crate) async fn fuzzy_candidates(
        &self,
        norm: &str,
        pair: LanguagePair,
    ) -> Result<Vec<(String, TermEntry)>> {
        let rows = sqlx::query(
            "SELECT * FROM terms
             WHERE src_lang = ? AND tgt_lang = ? AND source_norm != ?",
        )
        .bind(pair.src.code())
        .bind(pair.tgt.code())
        .bind(norm)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let entry = row_to_entry(row, pair)?;
                let norm: String = row.get("source_norm");
                Ok((norm, entry))
            })
            .collect()
    }

    /// Entry counts per pair and domain.
    pub async fn stats(&self) -> Result<TermbaseStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM terms")
            .fetch_one(&self.pool)
            .await?;

        let mut stats = TermbaseStats {
            total,
            ..TermbaseStats::default()
        };

        let pair_rows = sqlx::query(
            "SELECT src_lang, tgt_lang, COUNT(*) AS n FROM terms GROUP BY src_lang, tgt_lang",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in pair_rows {
            let src: String = row.get("src_lang");
            let tgt: String = row.get("tgt_lang");
            let n: i64 = row.get("n");
            stats.by_pair.insert(format!("{src}-{tgt}"), n);
        }

        let domain_rows = sqlx::query(
            "SELECT domain, COUNT(*) AS n FROM terms WHERE domain != '' GROUP BY domain",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in domain_rows {
            let domain: String = row.get("domain");
            let n: i64 = row.get("n");
            stats.by_domain.insert(domain, n);
        }

        Ok(stats)
    }

    /// Count of entries for one pair, used by preprocessing reports.
    pub async fn count(&self, pair: LanguagePair) -> Result<i64> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM terms WHERE src_lang = ? AND tgt_lang = ?")
                .bind(pair.src.code())
                .bind(pair.tgt.code())
                .fetch_one(&self.pool)
                .await?;
        Ok(n)
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow, pair: LanguagePair) -> Result<TermEntry> {
    let contexts_json: String = row.get("contexts");
    let contexts: Vec<String> = serde_json::from_str(&contexts_json).unwrap_or_default();
    Ok(TermEntry {
        source_form: row.get("source_form"),
        target_form: row.get("target_form"),
        pair,
        definition: row.get("definition"),
        domain: row.get("domain"),
        confidence: row.get("confidence"),
        occurrence_count: row.get("occurrence_count"),
        contexts,
    })
}

impl TermStore {
    /// Import entries from a serde JSON array file. Returns the ingest report.
    pub async fn import_json(&self, path: &Path) -> Result<IngestReport> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<TermEntry> = serde_json::from_str(&content)?;
        if entries.is_empty() {
            return Err(Error::InputInvalid(format!(
                "no term entries in {}",
                path.display()
            )));
        }
        self.ingest(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexmt_common::types::Lang;

    fn entry(source: &str, target: &str, confidence: f64) -> TermEntry {
        TermEntry {
            source_form: source.to_string(),
            target_form: target.to_string(),
            pair: LanguagePair::zh_en(),
            definition: None,
            domain: "legal".to_string(),
            confidence,
            occurrence_count: 1,
            contexts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn ingest_is_structurally_idempotent() {
        let store = TermStore::in_memory().await.unwrap();
        let entries = vec![entry("劳动者", "worker", 0.9), entry("合同", "contract", 0.95)];

        let first = store.ingest(&entries).await.unwrap();
        assert_eq!(first, IngestReport { inserted: 2, merged: 0 });

        let second = store.ingest(&entries).await.unwrap();
        assert_eq!(second, IngestReport { inserted: 0, merged: 2 });

        let exported = store.export(LanguagePair::zh_en()).await.unwrap();
        assert_eq!(exported.len(), 2);
        // Counts aggregate across ingests
        for e in exported {
            assert_eq!(e.occurrence_count, 2);
        }
    }

    #[tokio::test]
    async fn second_translation_is_an_alternative_not_a_replacement() {
        let store = TermStore::in_memory().await.unwrap();
        store.ingest(&[entry("劳动者", "worker", 0.9)]).await.unwrap();
        store.ingest(&[entry("劳动者", "laborer", 0.7)]).await.unwrap();

        let exported = store.export(LanguagePair::zh_en()).await.unwrap();
        assert_eq!(exported.len(), 2);
        let targets: Vec<_> = exported.iter().map(|e| e.target_form.as_str()).collect();
        assert!(targets.contains(&"worker"));
        assert!(targets.contains(&"laborer"));
    }

    #[tokio::test]
    async fn contexts_are_unioned_and_capped() {
        let store = TermStore::in_memory().await.unwrap();
        let mut first = entry("劳动者", "worker", 0.9);
        first.contexts = vec!["ctx-a".to_string()];
        store.ingest(&[first]).await.unwrap();

        let mut second = entry("劳动者", "worker", 0.9);
        second.contexts = vec!["ctx-a".to_string(), "ctx-b".to_string(), "ctx-c".to_string()];
        store.ingest(&[second]).await.unwrap();

        let exported = store.export(LanguagePair::zh_en()).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].contexts, vec!["ctx-a", "ctx-b"]);
    }

    #[tokio::test]
    async fn confidence_keeps_the_maximum() {
        let store = TermStore::in_memory().await.unwrap();
        store.ingest(&[entry("合同", "contract", 0.6)]).await.unwrap();
        store.ingest(&[entry("合同", "contract", 0.9)]).await.unwrap();
        store.ingest(&[entry("合同", "contract", 0.3)]).await.unwrap();

        let exported = store.export(LanguagePair::zh_en()).await.unwrap();
        assert!((exported[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_forms_are_skipped() {
        let store = TermStore::in_memory().await.unwrap();
        let report = store
            .ingest(&[entry("", "worker", 0.9), entry("合同", "", 0.9)])
            .await
            .unwrap();
        assert_eq!(report, IngestReport::default());
        assert_eq!(store.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn stats_group_by_pair_and_domain() {
        let store = TermStore::in_memory().await.unwrap();
        let mut ja = entry("契約", "契約書", 1.0);
        ja.pair = LanguagePair::new(Lang::Zh, Lang::Ja);
        store
            .ingest(&[entry("合同", "contract", 0.9), ja])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_pair.get("zh-en"), Some(&1));
        assert_eq!(stats.by_pair.get("zh-ja"), Some(&1));
        assert_eq!(stats.by_domain.get("legal"), Some(&2));
    }
}
