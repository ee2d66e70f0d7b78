use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::usage::{UsageRecord, format_usd};

// ── Run status ────────────────────────────────────────────────────────

/// Ordered run status vocabulary. Declaration order is the progress order,
/// so `Ord` gives the monotonic-advance comparison directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "10%")]
    Progress10,
    #[serde(rename = "20%")]
    Progress20,
    #[serde(rename = "30%")]
    Progress30,
    #[serde(rename = "40%")]
    Progress40,
    #[serde(rename = "50%")]
    Progress50,
    #[serde(rename = "60%")]
    Progress60,
    #[serde(rename = "70%")]
    Progress70,
    #[serde(rename = "80%")]
    Progress80,
    #[serde(rename = "90%")]
    Progress90,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Progress10 => "10%",
            Self::Progress20 => "20%",
            Self::Progress30 => "30%",
            Self::Progress40 => "40%",
            Self::Progress50 => "50%",
            Self::Progress60 => "60%",
            Self::Progress70 => "70%",
            Self::Progress80 => "80%",
            Self::Progress90 => "90%",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a forward step.
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        !self.is_terminal() && next > *self
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "10%" => Ok(Self::Progress10),
            "20%" => Ok(Self::Progress20),
            "30%" => Ok(Self::Progress30),
            "40%" => Ok(Self::Progress40),
            "50%" => Ok(Self::Progress50),
            "60%" => Ok(Self::Progress60),
            "70%" => Ok(Self::Progress70),
            "80%" => Ok(Self::Progress80),
            "90%" => Ok(Self::Progress90),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Trigger vocabulary ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Digestion,
    Aggregation,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Digestion => "digestion",
            Self::Aggregation => "aggregation",
        }
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    /// Accepts both the pipeline names and the ingestion-type aliases
    /// (`digest`, `aggregate`) that trigger payloads use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digestion" | "digest" => Ok(Self::Digestion),
            "aggregation" | "aggregate" => Ok(Self::Aggregation),
            _ => Err(format!("Invalid ingestion type: {}", s)),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one data-dependent branch point. Decided once when the run is
/// created and read back on every resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Normal,
    Verbatim,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Verbatim => "verbatim",
        }
    }

    /// Any source flagged for verbatim copying switches the whole run.
    pub fn for_sources(sources: &[Source]) -> Self {
        if sources.iter().any(|s| s.flags.copy_source_verbatim) {
            Self::Verbatim
        } else {
            Self::Normal
        }
    }
}

impl FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "verbatim" => Ok(Self::Verbatim),
            _ => Err(format!("Invalid branch: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    #[serde(rename = "claude-3.7")]
    Claude37,
    #[serde(rename = "claude-4")]
    Claude4,
    #[serde(rename = "claude-4.5")]
    Claude45,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude37 => "claude-3.7",
            Self::Claude4 => "claude-4",
            Self::Claude45 => "claude-4.5",
        }
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-3.7" => Ok(Self::Claude37),
            "claude-4" => Ok(Self::Claude4),
            "claude-4.5" => Ok(Self::Claude45),
            _ => Err(format!("Invalid model selection: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthRange {
    #[serde(rename = "100-250")]
    Brief,
    #[serde(rename = "400-550")]
    Short,
    #[serde(rename = "700-850")]
    Medium,
    #[serde(rename = "1000-1200")]
    Long,
}

impl LengthRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brief => "100-250",
            Self::Short => "400-550",
            Self::Medium => "700-850",
            Self::Long => "1000-1200",
        }
    }
}

impl FromStr for LengthRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "100-250" => Ok(Self::Brief),
            "400-550" => Ok(Self::Short),
            "700-850" => Ok(Self::Medium),
            "1000-1200" => Ok(Self::Long),
            _ => Err(format!("Invalid length range: {}", s)),
        }
    }
}

pub const MIN_BLOBS: u8 = 1;
pub const MAX_BLOBS: u8 = 6;

// ── Articles and sources ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub org_id: String,
    pub created_by_user_id: Option<String>,
    pub slug: String,
    pub version: i64,
    /// Headline the user typed in, if any. Overrides the generated one.
    pub headline: Option<String>,
    pub instructions: String,
    pub final_headline: Option<String>,
    pub final_body: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFlags {
    pub is_primary_source: bool,
    pub copy_source_verbatim: bool,
    pub is_base_source: bool,
}

/// One input document. `number` is 1-based and is the correlation key
/// every fan-out result is matched back on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub number: u32,
    pub attribution: String,
    pub url: Option<String>,
    pub description: String,
    pub text: String,
    pub flags: SourceFlags,
}

/// Article as imported from a JSON file or created by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    pub id: String,
    pub org_id: String,
    #[serde(default)]
    pub created_by_user_id: Option<String>,
    pub slug: String,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub sources: Vec<NewSource>,
}

fn default_version() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub text: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_verbatim: bool,
    #[serde(default)]
    pub is_base: bool,
}

/// Content written back to the article once a run finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalContent {
    pub headline: String,
    pub blobs: Vec<String>,
    pub body: String,
    /// Lexical editor JSON with per-source colouring (aggregation only).
    pub rich_content: Option<String>,
    pub rip_report: Option<serde_json::Value>,
}

// ── Trigger events ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: String,
    pub kind: WorkflowKind,
    pub article_id: String,
    pub user_id: String,
    pub org_id: String,
    pub length_range: LengthRange,
    pub number_of_blobs: u8,
    pub model_tier: ModelTier,
    pub verbose: bool,
}

// ── Runs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewRun {
    pub event: TriggerEvent,
    pub branch: Branch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub event_id: String,
    pub article_id: String,
    pub user_id: String,
    pub kind: WorkflowKind,
    pub branch: Branch,
    pub status: RunStatus,
    pub model_tier: ModelTier,
    pub length_range: LengthRange,
    pub number_of_blobs: u8,
    pub verbose: bool,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_nanos: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Run {
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            run_id: self.id.clone(),
            status: self.status,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost_nanos: self.cost_nanos,
        }
    }
}

/// Cumulative status and usage of one run, as returned by checkpoints and
/// exposed to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub run_id: String,
    pub status: RunStatus,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_nanos: i64,
}

impl RunTotals {
    pub fn cost_usd(&self) -> String {
        format_usd(self.cost_nanos)
    }
}

/// A usage delta after pricing, as written to the audit table.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedUsage {
    pub usage: UsageRecord,
    pub cost_nanos: i64,
}

// ── Memoized steps ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub step_name: String,
    pub output: serde_json::Value,
    pub usage: Vec<UsageRecord>,
    pub success: bool,
    pub attempts: u32,
    pub recorded_at: String,
}
