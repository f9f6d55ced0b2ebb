//! Shared domain model for the hierarchical translation pipeline
//!
//! These are the typed contracts between the refinement layers, the
//! orchestrator, the preprocessing pipeline, and the experiment harness.
//! Layer artifacts are kept fully typed so run artifacts round-trip through
//! serde without loss.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered language pair, e.g. zh -> en
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub src: Lang,
    pub tgt: Lang,
}

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Zh,
    En,
    Ja,
}

impl Lang {
    pub fn code(&self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
            Lang::Ja => "ja",
        }
    }
}

impl FromStr for Lang {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" => Ok(Lang::Zh),
            "en" => Ok(Lang::En),
            "ja" => Ok(Lang::Ja),
            other => Err(Error::Config(format!("unsupported language: {other}"))),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl LanguagePair {
    pub fn new(src: Lang, tgt: Lang) -> Self {
        Self { src, tgt }
    }

    pub fn zh_en() -> Self {
        Self::new(Lang::Zh, Lang::En)
    }

    /// Suffix used for per-pair vector collections, e.g. "zh_en"
    pub fn collection_suffix(&self) -> String {
        format!("{}_{}", self.src.code(), self.tgt.code())
    }
}

impl FromStr for LanguagePair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (src, tgt) = s
            .split_once('-')
            .or_else(|| s.split_once("->"))
            .ok_or_else(|| Error::Config(format!("invalid language pair: {s}")))?;
        Ok(Self {
            src: src.parse()?,
            tgt: tgt.parse()?,
        })
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.src, self.tgt)
    }
}

/// One source segment to translate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub source: String,
    pub pair: LanguagePair,
    /// Reference translation, present only for evaluation datasets
    #[serde(default)]
    pub reference: Option<String>,
}

impl Segment {
    pub fn new(id: impl Into<String>, source: impl Into<String>, pair: LanguagePair) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            pair,
            reference: None,
        }
    }
}

// ============================================================================
// Termbase model
// ============================================================================

/// Maximum example contexts retained per term entry
pub const MAX_TERM_CONTEXTS: usize = 2;

/// One termbase entry. (source_form, target_form, pair) is unique; a second
/// translation for the same source_form is stored as an alternative entry,
/// never a replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermEntry {
    pub source_form: String,
    pub target_form: String,
    pub pair: LanguagePair,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub domain: String,
    pub confidence: f64,
    pub occurrence_count: i64,
    /// Up to [`MAX_TERM_CONTEXTS`] example sentences
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// Provenance of a candidate target form in a term table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOrigin {
    #[serde(rename = "db-exact")]
    DbExact,
    #[serde(rename = "db-fuzzy")]
    DbFuzzy,
    #[serde(rename = "db-vector")]
    DbVector,
    #[serde(rename = "llm")]
    Llm,
}

impl MatchOrigin {
    /// Rank used when fusing lookup passes: exact beats fuzzy beats vector.
    pub fn pass_rank(&self) -> u8 {
        match self {
            MatchOrigin::DbExact => 0,
            MatchOrigin::DbFuzzy => 1,
            MatchOrigin::DbVector => 2,
            MatchOrigin::Llm => 3,
        }
    }
}

/// One ranked termbase lookup hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermHit {
    pub entry: TermEntry,
    /// Similarity in [0,1]; 1.0 for exact matches
    pub similarity: f64,
    pub origin: MatchOrigin,
}

/// Candidate target form attached to a term-table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermCandidate {
    pub target: String,
    pub confidence: f64,
    pub origin: MatchOrigin,
}

/// Per-segment mapping from extracted source terms to constrained targets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermTable {
    pub rows: Vec<TermTableRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermTableRow {
    pub source_term: String,
    pub importance: f64,
    pub candidates: Vec<TermCandidate>,
    /// True when no database pass produced a candidate
    pub needs_translation: bool,
}

impl TermTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows with at least one database-backed candidate; these constrain the
    /// translation and are checked by higher layers.
    pub fn constrained(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rows.iter().filter_map(|row| {
            row.candidates
                .first()
                .filter(|c| c.origin != MatchOrigin::Llm)
                .map(|c| (row.source_term.as_str(), c.target.as_str()))
        })
    }
}

// ============================================================================
// Translation-memory model
// ============================================================================

/// One aligned TM pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmEntry {
    pub source_text: String,
    pub target_text: String,
    pub pair: LanguagePair,
}

/// TM search hit with fused hybrid score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmHit {
    pub entry: TmEntry,
    pub score: f64,
}

/// TM reference handed to the discourse layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmReference {
    pub source_text: String,
    pub target_text: String,
    pub similarity: f64,
}

// ============================================================================
// Syntax model
// ============================================================================

/// Closed category set for bilingual syntactic patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Modal,
    Connective,
    Conditional,
    Voice,
    Nominalization,
    Other,
}

/// Bilingual template pair identified by the syntax layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxPattern {
    pub source_pattern: String,
    pub target_pattern: String,
    pub category: PatternCategory,
    pub confidence: f64,
}

// ============================================================================
// Layer evaluations (produced by evaluator agents, recorded in artifacts)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermEvaluation {
    pub accuracy: f64,
    pub consistency: f64,
    pub completeness: f64,
    pub overall: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxEvaluation {
    pub modal_fidelity: f64,
    pub connective_consistency: f64,
    pub conditional_logic: f64,
    pub voice_appropriateness: f64,
    pub overall: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Divergence report comparing the current translation to TM references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub term_consistency: f64,
    pub syntactic_alignment: f64,
    pub style_alignment: f64,
    pub overall: f64,
    /// Concrete token/clause-level differences to address
    #[serde(default)]
    pub divergences: Vec<String>,
}

// ============================================================================
// Pipeline outputs
// ============================================================================

/// The three refinement layers, in fixed pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Terminology,
    Syntax,
    Discourse,
}

/// Fixed execution order of the layers
pub const LAYER_ORDER: [LayerKind; 3] = [
    LayerKind::Terminology,
    LayerKind::Syntax,
    LayerKind::Discourse,
];

impl FromStr for LayerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminology" | "term" => Ok(LayerKind::Terminology),
            "syntax" => Ok(LayerKind::Syntax),
            "discourse" => Ok(LayerKind::Discourse),
            other => Err(Error::Config(format!("unknown layer: {other}"))),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayerKind::Terminology => "terminology",
            LayerKind::Syntax => "syntax",
            LayerKind::Discourse => "discourse",
        })
    }
}

/// One translation candidate produced under selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    /// Rank assigned by the selector (0 = chosen)
    pub rank: usize,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Component-specific evidence attached to a layer output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerArtifacts {
    Terminology {
        term_table: TermTable,
        evaluation: Option<TermEvaluation>,
    },
    Syntax {
        patterns: Vec<SyntaxPattern>,
        evaluation: Option<SyntaxEvaluation>,
        /// Term choices the revision changed despite the term table
        overrides: Vec<String>,
    },
    Discourse {
        references: Vec<TmReference>,
        report: Option<DivergenceReport>,
    },
}

/// Output of one refinement layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerOutput {
    pub layer: LayerKind,
    pub translation: String,
    pub confidence: f64,
    pub gated: bool,
    #[serde(default)]
    pub gated_reason: Option<String>,
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub chosen_index: Option<usize>,
    pub artifacts: LayerArtifacts,
}

/// Ordered record of layer outputs for one segment; immutable once emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTrace {
    /// Direct-LLM translation, present when no layers ran or when the
    /// terminology layer gated onto the baseline
    #[serde(default)]
    pub baseline: Option<String>,
    pub layers: Vec<LayerOutput>,
    pub final_translation: String,
}

impl PipelineTrace {
    pub fn output_of(&self, layer: LayerKind) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.layer == layer)
            .map(|l| l.translation.as_str())
    }
}

// ============================================================================
// Control & ablation configuration
// ============================================================================

/// Per-layer gating thresholds in [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatingThresholds {
    pub terminology: f64,
    pub syntax: f64,
    pub discourse: f64,
}

impl Default for GatingThresholds {
    fn default() -> Self {
        Self {
            terminology: 0.90,
            syntax: 0.85,
            discourse: 0.75,
        }
    }
}

impl GatingThresholds {
    pub fn for_layer(&self, layer: LayerKind) -> f64 {
        match layer {
            LayerKind::Terminology => self.terminology,
            LayerKind::Syntax => self.syntax,
            LayerKind::Discourse => self.discourse,
        }
    }
}

/// Symbolic or explicit subset of layers, parsed from CLI-style strings:
/// `none`, `all`, `last`, or a comma-separated list of layer names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerSet {
    None,
    All,
    Last,
    Layers(Vec<LayerKind>),
}

impl Default for LayerSet {
    fn default() -> Self {
        LayerSet::None
    }
}

impl LayerSet {
    /// Resolve against the enabled layers of a run. `Last` means the final
    /// enabled layer; explicit layers outside `enabled` are dropped.
    pub fn resolve(&self, enabled: &[LayerKind]) -> Vec<LayerKind> {
        match self {
            LayerSet::None => Vec::new(),
            LayerSet::All => enabled.to_vec(),
            LayerSet::Last => enabled.last().copied().into_iter().collect(),
            LayerSet::Layers(layers) => layers
                .iter()
                .copied()
                .filter(|l| enabled.contains(l))
                .collect(),
        }
    }
}

impl FromStr for LayerSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(LayerSet::None),
            "all" => Ok(LayerSet::All),
            "last" => Ok(LayerSet::Last),
            list => {
                let layers = list
                    .split(',')
                    .map(|part| part.parse::<LayerKind>())
                    .collect::<Result<Vec<_>>>()?;
                Ok(LayerSet::Layers(layers))
            }
        }
    }
}

/// Process-wide translation control record, read-only after construction.
/// Threaded explicitly through the orchestrator and layers; never
/// re-initialized mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Enabled layers, in pipeline order. Empty means baseline-only.
    pub enabled_layers: Vec<LayerKind>,
    pub use_termbase: bool,
    pub use_tm: bool,
    pub selection_layers: LayerSet,
    pub num_candidates: usize,
    pub gating_layers: LayerSet,
    pub gating_thresholds: GatingThresholds,
    /// Similarity floor applied to TM references
    pub tm_floor: f64,
    pub max_concurrent: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled_layers: LAYER_ORDER.to_vec(),
            use_termbase: true,
            use_tm: true,
            selection_layers: LayerSet::None,
            num_candidates: 1,
            gating_layers: LayerSet::None,
            gating_thresholds: GatingThresholds::default(),
            tm_floor: 0.7,
            max_concurrent: 10,
        }
    }
}

impl ControlConfig {
    /// Validate ranges and ordering; invalid configuration refuses to start.
    pub fn validate(&self) -> Result<()> {
        let mut last_rank = None;
        for layer in &self.enabled_layers {
            let rank = LAYER_ORDER.iter().position(|l| l == layer).unwrap();
            if let Some(prev) = last_rank {
                if rank <= prev {
                    return Err(Error::Config(
                        "enabled_layers must follow terminology, syntax, discourse order"
                            .to_string(),
                    ));
                }
            }
            last_rank = Some(rank);
        }
        if self.num_candidates < 1 {
            return Err(Error::Config("num_candidates must be >= 1".to_string()));
        }
        if self.max_concurrent < 1 {
            return Err(Error::Config("max_concurrent must be >= 1".to_string()));
        }
        for (name, value) in [
            ("terminology", self.gating_thresholds.terminology),
            ("syntax", self.gating_thresholds.syntax),
            ("discourse", self.gating_thresholds.discourse),
            ("tm_floor", self.tm_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "threshold {name} must be within [0,1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Selection is driven by the layer set alone; with `num_candidates = 1`
    /// the selector call is skipped and the single candidate is recorded
    /// with rationale "single_candidate".
    pub fn selection_enabled(&self, layer: LayerKind) -> bool {
        self.selection_layers
            .resolve(&self.enabled_layers)
            .contains(&layer)
    }

    pub fn gating_enabled(&self, layer: LayerKind) -> bool {
        self.gating_layers
            .resolve(&self.enabled_layers)
            .contains(&layer)
    }
}

/// One named ablation: a control configuration evaluated against a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AblationConfig {
    pub name: String,
    pub control: ControlConfig,
}

impl AblationConfig {
    pub fn new(name: impl Into<String>, control: ControlConfig) -> Self {
        Self {
            name: name.into(),
            control,
        }
    }

    /// The four standard ablations, weakest to strongest.
    pub fn presets() -> Vec<AblationConfig> {
        vec![
            AblationConfig::new(
                "baseline",
                ControlConfig {
                    enabled_layers: Vec::new(),
                    use_termbase: false,
                    use_tm: false,
                    ..ControlConfig::default()
                },
            ),
            AblationConfig::new(
                "terminology",
                ControlConfig {
                    enabled_layers: vec![LayerKind::Terminology],
                    use_tm: false,
                    ..ControlConfig::default()
                },
            ),
            AblationConfig::new(
                "terminology_syntax",
                ControlConfig {
                    enabled_layers: vec![LayerKind::Terminology, LayerKind::Syntax],
                    use_tm: false,
                    ..ControlConfig::default()
                },
            ),
            AblationConfig::new("full", ControlConfig::default()),
        ]
    }

    pub fn preset(name: &str) -> Result<AblationConfig> {
        Self::presets()
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::Config(format!("unknown ablation preset: {name}")))
    }
}
