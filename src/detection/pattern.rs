//! Pattern records produced by one detection cycle
//!
//! Patterns live only in memory. Each variant carries the fields that
//! identify it; the same fields form its dedup key.

use serde::{Deserialize, Serialize};

/// Detection result kinds. Adding a variant forces the synthesizer's match
/// to be updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum PatternKind {
    /// Same concept learned from several distinct sources
    CrossSourceConcept { concept: String, sources: Vec<String> },
    /// A source with an unusually high number of events
    HighActivity { source: String, count: usize },
    /// A command invoked repeatedly
    CliMastery { command: String, count: usize },
    /// Same concept learned repeatedly within a short span
    RapidReinforcement {
        concept: String,
        count: usize,
        span_hours: f64,
    },
    /// Many events inside one clock hour (`YYYY-MM-DDTHH`)
    WorkflowActivity { hour: String, count: usize },
    /// Two adjacent events from different sources
    SourceTransition { from: String, to: String },
    /// Emitted by detectors registered outside this crate
    Custom { name: String, count: usize },
}

/// A single detection result with its confidence in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(flatten)]
    pub kind: PatternKind,
    pub confidence: f64,
}

impl Pattern {
    pub fn new(kind: PatternKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Serialized variant name, e.g. `cli_mastery`
    pub fn variant(&self) -> &str {
        match &self.kind {
            PatternKind::CrossSourceConcept { .. } => "cross_source_concept",
            PatternKind::HighActivity { .. } => "high_activity",
            PatternKind::CliMastery { .. } => "cli_mastery",
            PatternKind::RapidReinforcement { .. } => "rapid_reinforcement",
            PatternKind::WorkflowActivity { .. } => "workflow_activity",
            PatternKind::SourceTransition { .. } => "source_transition",
            PatternKind::Custom { name, .. } => name,
        }
    }

    /// Number of records backing this pattern
    pub fn supporting_count(&self) -> usize {
        match &self.kind {
            PatternKind::CrossSourceConcept { sources, .. } => sources.len(),
            PatternKind::HighActivity { count, .. }
            | PatternKind::CliMastery { count, .. }
            | PatternKind::RapidReinforcement { count, .. }
            | PatternKind::WorkflowActivity { count, .. }
            | PatternKind::Custom { count, .. } => *count,
            PatternKind::SourceTransition { .. } => 2,
        }
    }

    /// Deterministic identity used to suppress re-emission
    pub fn dedup_key(&self) -> String {
        match &self.kind {
            PatternKind::CrossSourceConcept { concept, sources } => {
                format!("cross_source_concept:{}:{}", concept, sources.len())
            }
            PatternKind::HighActivity { source, count } => {
                format!("high_activity:{}:{}", source, count)
            }
            PatternKind::CliMastery { command, count } => {
                format!("cli_mastery:{}:{}", command, count)
            }
            PatternKind::RapidReinforcement { concept, count, .. } => {
                format!("rapid_reinforcement:{}:{}", concept, count)
            }
            PatternKind::WorkflowActivity { hour, count } => {
                format!("workflow_activity:{}:{}", hour, count)
            }
            PatternKind::SourceTransition { from, to } => {
                format!("source_transition:{}:{}", from, to)
            }
            PatternKind::Custom { name, count } => format!("custom:{}:{}", name, count),
        }
    }

    /// Canonical source attribution for insight metadata
    pub fn source_attribution(&self) -> &str {
        match &self.kind {
            PatternKind::HighActivity { source, .. } => source,
            PatternKind::SourceTransition { from, .. } => from,
            _ => "multi",
        }
    }

    /// Concept carried by the pattern, if any
    pub fn concept(&self) -> Option<&str> {
        match &self.kind {
            PatternKind::CrossSourceConcept { concept, .. }
            | PatternKind::RapidReinforcement { concept, .. } => Some(concept),
            _ => None,
        }
    }

    /// Every source the pattern mentions
    pub fn sources(&self) -> Vec<&str> {
        match &self.kind {
            PatternKind::HighActivity { source, .. } => vec![source.as_str()],
            PatternKind::SourceTransition { from, to } => vec![from.as_str(), to.as_str()],
            _ => Vec::new(),
        }
    }
}
