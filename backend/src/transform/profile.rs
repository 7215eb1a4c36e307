//! Cleaning profiles: the ordered, typed stage configuration of a run.
//!
//! A profile serializes as
//!
//! ```json
//! { "name": "default",
//!   "stages": [ { "stage_id": "size_filter", "enabled": true,
//!                 "parameters": { "min_size_mb": 10.0 } }, ... ] }
//! ```
//!
//! Each stage id maps to exactly one parameter struct. Unknown parameters are
//! rejected; missing ones take their defaults.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::models::{canonical_fields, StageId, TrajectoryStats};
use crate::transform::stages::FileStage;
use crate::validation;

// =============================================================================
// Parameter Structs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizeFilterParams {
    /// Files smaller than this (MiB) are excluded.
    pub min_size_mb: f64,
}

impl Default for SizeFilterParams {
    fn default() -> Self {
        Self { min_size_mb: 10.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderParams {
    pub canonical_fields: Vec<String>,
    /// Keep non-canonical fields after the canonical block.
    pub retain_extras: bool,
    /// Canonical field -> alternative names accepted for it.
    pub aliases: BTreeMap<String, Vec<String>>,
}

impl Default for HeaderParams {
    fn default() -> Self {
        let alias = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "position_n".to_string(),
            alias(&["north", "pos_n", "posn", "position_north", "pos_north", "position_x", "pos_x", "x"]),
        );
        aliases.insert(
            "position_e".to_string(),
            alias(&["east", "pos_e", "pose", "position_east", "pos_east", "position_y", "pos_y", "y"]),
        );
        aliases.insert(
            "position_d".to_string(),
            alias(&["down", "pos_d", "posd", "position_down", "pos_down", "position_z", "pos_z", "z"]),
        );

        Self {
            canonical_fields: canonical_fields(),
            retain_extras: false,
            aliases,
        }
    }
}

/// How the static flight detector measures displacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementMethod {
    /// Bounding-box diagonal of all positions.
    #[default]
    Extent,
    /// First to last position.
    Endpoints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticFlightParams {
    /// Metres.
    pub distance_threshold: f64,
    pub method: DisplacementMethod,
    /// Exclude flagged files; otherwise only annotate.
    pub exclude: bool,
}

impl Default for StaticFlightParams {
    fn default() -> Self {
        Self {
            distance_threshold: 10.0,
            method: DisplacementMethod::Extent,
            exclude: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrimmerParams {
    /// Samples per window.
    pub window: usize,
    pub speed_threshold: f64,
    /// Metres.
    pub position_threshold: f64,
    pub speed_field: Option<String>,
}

impl Default for TrimmerParams {
    fn default() -> Self {
        Self {
            window: 50,
            speed_threshold: 0.5,
            position_threshold: 0.5,
            speed_field: Some("vg".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SampleRemoverParams {
    /// Records with speed at or below this are dropped.
    pub speed_threshold: f64,
    pub speed_field: Option<String>,
}

impl Default for SampleRemoverParams {
    fn default() -> Self {
        Self {
            speed_threshold: 0.0,
            speed_field: Some("vg".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnRemoverParams {
    pub columns: Vec<String>,
}

impl Default for ColumnRemoverParams {
    fn default() -> Self {
        Self {
            columns: ["Quat_1", "Quat_2", "Quat_3", "Quat_4", "quat_valid"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Per-file metric compared across the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    MeanSpeed,
    TotalDistance,
    AltitudeChange,
    Duration,
}

impl AnomalyMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeanSpeed => "mean_speed",
            Self::TotalDistance => "total_distance",
            Self::AltitudeChange => "altitude_change",
            Self::Duration => "duration",
        }
    }

    pub fn value(&self, stats: &TrajectoryStats) -> f64 {
        match self {
            Self::MeanSpeed => stats.mean_speed,
            Self::TotalDistance => stats.total_distance,
            Self::AltitudeChange => stats.altitude_change,
            Self::Duration => stats.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyParams {
    pub threshold_sigma: f64,
    pub metrics: Vec<AnomalyMetric>,
    /// Exclude flagged files; otherwise report only.
    pub exclude: bool,
    /// Below this many surviving files nothing is flagged.
    pub min_files: usize,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            threshold_sigma: 2.0,
            metrics: vec![
                AnomalyMetric::MeanSpeed,
                AnomalyMetric::TotalDistance,
                AnomalyMetric::AltitudeChange,
            ],
            exclude: false,
            min_files: 3,
        }
    }
}

pub const NUMBER_PLACEHOLDER: &str = "{number}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResequencerParams {
    /// Output name with one `{number}` placeholder.
    pub template: String,
    pub start: u64,
    /// Zero-padding width; `None` pads to the widest assigned number.
    pub pad_width: Option<usize>,
}

impl Default for ResequencerParams {
    fn default() -> Self {
        Self {
            template: "test {number}.csv".to_string(),
            start: 1,
            pad_width: None,
        }
    }
}

impl ResequencerParams {
    /// Name for one counter value.
    pub fn render(&self, number: u64, width: usize) -> String {
        let formatted = format!("{:0width$}", number, width = width);
        self.template.replacen(NUMBER_PLACEHOLDER, &formatted, 1)
    }
}

// =============================================================================
// Parameter Validation
// =============================================================================

fn invalid(stage: StageId, parameter: &str, message: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        stage: stage.to_string(),
        parameter: parameter.to_string(),
        message: message.to_string(),
    }
}

fn non_negative(stage: StageId, parameter: &str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() {
        return Err(invalid(stage, parameter, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(invalid(stage, parameter, "must not be negative"));
    }
    Ok(())
}

fn speed_field(stage: StageId, field: &Option<String>) -> ConfigResult<()> {
    match field {
        Some(f) if f.trim().is_empty() => Err(invalid(stage, "speed_field", "must not be empty")),
        _ => Ok(()),
    }
}

impl SizeFilterParams {
    pub fn validate(&self) -> ConfigResult<()> {
        non_negative(StageId::SizeFilter, "min_size_mb", self.min_size_mb)
    }
}

impl HeaderParams {
    pub fn validate(&self) -> ConfigResult<()> {
        let stage = StageId::HeaderStandardizer;
        if self.canonical_fields.is_empty() {
            return Err(invalid(stage, "canonical_fields", "must not be empty"));
        }
        let mut seen = HashSet::new();
        for field in &self.canonical_fields {
            if field.trim().is_empty() {
                return Err(invalid(stage, "canonical_fields", "field names must not be empty"));
            }
            if !seen.insert(field.as_str()) {
                return Err(invalid(stage, "canonical_fields", &format!("duplicate field '{}'", field)));
            }
        }
        Ok(())
    }
}

impl StaticFlightParams {
    pub fn validate(&self) -> ConfigResult<()> {
        non_negative(StageId::StaticFlightDetector, "distance_threshold", self.distance_threshold)
    }
}

impl TrimmerParams {
    pub fn validate(&self) -> ConfigResult<()> {
        let stage = StageId::StaticStartTrimmer;
        if self.window == 0 {
            return Err(invalid(stage, "window", "must be at least 1"));
        }
        non_negative(stage, "speed_threshold", self.speed_threshold)?;
        non_negative(stage, "position_threshold", self.position_threshold)?;
        speed_field(stage, &self.speed_field)
    }
}

impl SampleRemoverParams {
    pub fn validate(&self) -> ConfigResult<()> {
        non_negative(StageId::StaticSampleRemover, "speed_threshold", self.speed_threshold)?;
        speed_field(StageId::StaticSampleRemover, &self.speed_field)
    }
}

impl ColumnRemoverParams {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.columns.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid(
                StageId::QuaternionColumnRemover,
                "columns",
                "column names must not be empty",
            ));
        }
        Ok(())
    }
}

impl AnomalyParams {
    pub fn validate(&self) -> ConfigResult<()> {
        let stage = StageId::AnomalyDetector;
        non_negative(stage, "threshold_sigma", self.threshold_sigma)?;
        if self.threshold_sigma == 0.0 {
            return Err(invalid(stage, "threshold_sigma", "must be greater than zero"));
        }
        if self.metrics.is_empty() {
            return Err(invalid(stage, "metrics", "select at least one metric"));
        }
        if self.min_files < 2 {
            return Err(invalid(stage, "min_files", "must be at least 2"));
        }
        Ok(())
    }
}

impl ResequencerParams {
    pub fn validate(&self) -> ConfigResult<()> {
        let malformed = |message: &str| ConfigError::MalformedTemplate {
            template: self.template.clone(),
            message: message.to_string(),
        };

        let placeholder = Regex::new(r"\{number\}").map_err(|e| malformed(&e.to_string()))?;
        match placeholder.find_iter(&self.template).count() {
            0 => return Err(malformed("missing {number} placeholder")),
            1 => {}
            _ => return Err(malformed("{number} must appear exactly once")),
        }

        let rest = placeholder.replace(&self.template, "");
        if rest.contains('{') || rest.contains('}') {
            return Err(malformed("unbalanced or unknown placeholder"));
        }
        if rest.contains('/') || rest.contains('\\') {
            return Err(malformed("must not contain path separators"));
        }
        if let Some(0) = self.pad_width {
            return Err(invalid(StageId::Resequencer, "pad_width", "must be at least 1"));
        }
        Ok(())
    }
}

// =============================================================================
// Stage Configuration
// =============================================================================

/// Typed configuration of one stage, one variant per stage id.
#[derive(Debug, Clone, PartialEq)]
pub enum StageConfig {
    SizeFilter(SizeFilterParams),
    HeaderStandardizer(HeaderParams),
    StaticFlightDetector(StaticFlightParams),
    StaticStartTrimmer(TrimmerParams),
    StaticSampleRemover(SampleRemoverParams),
    QuaternionColumnRemover(ColumnRemoverParams),
    AnomalyDetector(AnomalyParams),
    Resequencer(ResequencerParams),
}

impl StageConfig {
    /// Default parameters for a stage.
    pub fn default_for(id: StageId) -> Self {
        match id {
            StageId::SizeFilter => Self::SizeFilter(SizeFilterParams::default()),
            StageId::HeaderStandardizer => Self::HeaderStandardizer(HeaderParams::default()),
            StageId::StaticFlightDetector => Self::StaticFlightDetector(StaticFlightParams::default()),
            StageId::StaticStartTrimmer => Self::StaticStartTrimmer(TrimmerParams::default()),
            StageId::StaticSampleRemover => Self::StaticSampleRemover(SampleRemoverParams::default()),
            StageId::QuaternionColumnRemover => Self::QuaternionColumnRemover(ColumnRemoverParams::default()),
            StageId::AnomalyDetector => Self::AnomalyDetector(AnomalyParams::default()),
            StageId::Resequencer => Self::Resequencer(ResequencerParams::default()),
        }
    }

    /// Decode the parameters object of a stage.
    pub fn from_parts(id: StageId, parameters: Value) -> Result<Self, serde_json::Error> {
        let parameters = if parameters.is_null() {
            Value::Object(Default::default())
        } else {
            parameters
        };
        Ok(match id {
            StageId::SizeFilter => Self::SizeFilter(serde_json::from_value(parameters)?),
            StageId::HeaderStandardizer => Self::HeaderStandardizer(serde_json::from_value(parameters)?),
            StageId::StaticFlightDetector => Self::StaticFlightDetector(serde_json::from_value(parameters)?),
            StageId::StaticStartTrimmer => Self::StaticStartTrimmer(serde_json::from_value(parameters)?),
            StageId::StaticSampleRemover => Self::StaticSampleRemover(serde_json::from_value(parameters)?),
            StageId::QuaternionColumnRemover => {
                Self::QuaternionColumnRemover(serde_json::from_value(parameters)?)
            }
            StageId::AnomalyDetector => Self::AnomalyDetector(serde_json::from_value(parameters)?),
            StageId::Resequencer => Self::Resequencer(serde_json::from_value(parameters)?),
        })
    }

    pub fn stage_id(&self) -> StageId {
        match self {
            Self::SizeFilter(_) => StageId::SizeFilter,
            Self::HeaderStandardizer(_) => StageId::HeaderStandardizer,
            Self::StaticFlightDetector(_) => StageId::StaticFlightDetector,
            Self::StaticStartTrimmer(_) => StageId::StaticStartTrimmer,
            Self::StaticSampleRemover(_) => StageId::StaticSampleRemover,
            Self::QuaternionColumnRemover(_) => StageId::QuaternionColumnRemover,
            Self::AnomalyDetector(_) => StageId::AnomalyDetector,
            Self::Resequencer(_) => StageId::Resequencer,
        }
    }

    /// Parameters as a JSON value with sorted keys.
    pub fn parameters(&self) -> Value {
        let value = match self {
            Self::SizeFilter(p) => serde_json::to_value(p),
            Self::HeaderStandardizer(p) => serde_json::to_value(p),
            Self::StaticFlightDetector(p) => serde_json::to_value(p),
            Self::StaticStartTrimmer(p) => serde_json::to_value(p),
            Self::StaticSampleRemover(p) => serde_json::to_value(p),
            Self::QuaternionColumnRemover(p) => serde_json::to_value(p),
            Self::AnomalyDetector(p) => serde_json::to_value(p),
            Self::Resequencer(p) => serde_json::to_value(p),
        };
        value.unwrap_or_default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            Self::SizeFilter(p) => p.validate(),
            Self::HeaderStandardizer(p) => p.validate(),
            Self::StaticFlightDetector(p) => p.validate(),
            Self::StaticStartTrimmer(p) => p.validate(),
            Self::StaticSampleRemover(p) => p.validate(),
            Self::QuaternionColumnRemover(p) => p.validate(),
            Self::AnomalyDetector(p) => p.validate(),
            Self::Resequencer(p) => p.validate(),
        }
    }

    /// Per-file capability; `None` for corpus stages.
    pub fn as_file_stage(&self) -> Option<&dyn FileStage> {
        match self {
            Self::SizeFilter(p) => Some(p),
            Self::HeaderStandardizer(p) => Some(p),
            Self::StaticFlightDetector(p) => Some(p),
            Self::StaticStartTrimmer(p) => Some(p),
            Self::StaticSampleRemover(p) => Some(p),
            Self::QuaternionColumnRemover(p) => Some(p),
            Self::AnomalyDetector(_) | Self::Resequencer(_) => None,
        }
    }
}

/// Wire form of a stage entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStageSpec {
    stage_id: StageId,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    parameters: Value,
}

fn default_enabled() -> bool {
    true
}

/// One stage of a profile: its configuration and whether it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStageSpec", into = "RawStageSpec")]
pub struct StageSpec {
    pub enabled: bool,
    pub config: StageConfig,
}

impl TryFrom<RawStageSpec> for StageSpec {
    type Error = serde_json::Error;

    fn try_from(raw: RawStageSpec) -> Result<Self, Self::Error> {
        Ok(Self {
            enabled: raw.enabled,
            config: StageConfig::from_parts(raw.stage_id, raw.parameters)?,
        })
    }
}

impl From<StageSpec> for RawStageSpec {
    fn from(spec: StageSpec) -> Self {
        Self {
            stage_id: spec.config.stage_id(),
            enabled: spec.enabled,
            parameters: spec.config.parameters(),
        }
    }
}

impl StageSpec {
    pub fn new(config: StageConfig) -> Self {
        Self { enabled: true, config }
    }

    pub fn disabled(config: StageConfig) -> Self {
        Self { enabled: false, config }
    }

    pub fn id(&self) -> StageId {
        self.config.stage_id()
    }
}

// =============================================================================
// Cleaning Profile
// =============================================================================

/// Stages that must be re-run after a profile edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    /// First position whose configuration changed.
    pub from_position: Option<usize>,
    pub stages: Vec<StageId>,
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningProfile {
    #[serde(default = "default_profile_name")]
    pub name: String,
    pub stages: Vec<StageSpec>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for CleaningProfile {
    /// All eight stages, enabled, in table order.
    fn default() -> Self {
        Self {
            name: default_profile_name(),
            stages: StageId::ALL
                .iter()
                .map(|&id| StageSpec::new(StageConfig::default_for(id)))
                .collect(),
        }
    }
}

impl CleaningProfile {
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    pub fn position(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|s| s.id() == id)
    }

    pub fn get(&self, id: StageId) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.id() == id)
    }

    pub fn is_enabled(&self, id: StageId) -> bool {
        self.get(id).is_some_and(|s| s.enabled)
    }

    /// Check parameters and ordering rules.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for spec in &self.stages {
            if !seen.insert(spec.id()) {
                return Err(ConfigError::DuplicateStage(spec.id().to_string()));
            }
            spec.config.validate()?;
        }

        for (pos, spec) in self.stages.iter().enumerate() {
            if !spec.enabled {
                continue;
            }

            if let Some(stage) = spec.config.as_file_stage() {
                for &dep in stage.depends_on() {
                    match self.position(dep) {
                        Some(dep_pos) if self.stages[dep_pos].enabled && dep_pos > pos => {
                            return Err(ConfigError::StageOrder {
                                stage: spec.id().to_string(),
                                dependency: dep.to_string(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        // Corpus stages close the chain.
        if let Some(first_corpus) = self.stages.iter().position(|s| s.id().is_corpus()) {
            if let Some(late) = self.stages[first_corpus..].iter().find(|s| !s.id().is_corpus()) {
                return Err(ConfigError::StageOrder {
                    stage: late.id().to_string(),
                    dependency: self.stages[first_corpus].id().to_string(),
                });
            }
        }
        if let (Some(anomaly), Some(reseq)) = (
            self.position(StageId::AnomalyDetector),
            self.position(StageId::Resequencer),
        ) {
            if reseq < anomaly {
                return Err(ConfigError::StageOrder {
                    stage: StageId::Resequencer.to_string(),
                    dependency: StageId::AnomalyDetector.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Stages that differ from `self` in `edited`, from the first change to the end.
    pub fn invalidation(&self, edited: &CleaningProfile) -> Invalidation {
        let first_diff = self
            .stages
            .iter()
            .zip(&edited.stages)
            .position(|(a, b)| a != b)
            .or_else(|| {
                (self.stages.len() != edited.stages.len())
                    .then(|| self.stages.len().min(edited.stages.len()))
            });

        match first_diff {
            Some(pos) => {
                let mut stages: Vec<StageId> = edited.stages[pos.min(edited.stages.len())..]
                    .iter()
                    .map(|s| s.id())
                    .collect();
                // Removed trailing stages are invalidated too.
                for removed in self.stages.iter().skip(pos).map(|s| s.id()) {
                    if !stages.contains(&removed) {
                        stages.push(removed);
                    }
                }
                Invalidation {
                    from_position: Some(pos),
                    stages,
                }
            }
            None => Invalidation::default(),
        }
    }

    /// Parse, schema-check and validate a profile document.
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let value: Value = serde_json::from_str(content)?;
        validation::validate_profile(&value)?;
        let profile: CleaningProfile = serde_json::from_value(value)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
