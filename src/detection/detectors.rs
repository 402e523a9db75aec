//! Built-in detectors
//!
//! Each detector is pure over the snapshot it is given and returns its own
//! list of patterns. Grouping uses ordered maps so output order is stable
//! between runs over the same data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::command::{command_of, is_command_event};
use super::pattern::{Pattern, PatternKind};
use super::Snapshot;
use crate::types::bounded_confidence;

/// Highest confidence any threshold detector may report
const CONFIDENCE_CAP: f64 = 0.95;

/// A source needs more than this many events to count as high activity
const HIGH_ACTIVITY_THRESHOLD: usize = 5;

/// Uses of one command that count as mastery
const CLI_MASTERY_THRESHOLD: usize = 3;

/// Repeats of a concept within this span count as rapid reinforcement
const REINFORCEMENT_SPAN_HOURS: f64 = 12.0;

/// Events in one clock hour that form a workflow cluster
const WORKFLOW_CLUSTER_THRESHOLD: usize = 3;

const WORKFLOW_CONFIDENCE: f64 = 0.65;
const TRANSITION_CONFIDENCE: f64 = 0.5;

/// A single pattern detector
pub trait Detector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern>;
}

/// Concepts learned from at least two distinct sources
pub struct CrossSourceConceptDetector;

impl Detector for CrossSourceConceptDetector {
    fn name(&self) -> &'static str {
        "cross_source_concept"
    }

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let mut sources_by_concept: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for learning in snapshot.learnings {
            let sources = sources_by_concept.entry(learning.concept.as_str()).or_default();
            if !sources.contains(&learning.source) {
                sources.push(learning.source.clone());
            }
        }

        sources_by_concept
            .into_iter()
            .filter(|(_, sources)| sources.len() >= 2)
            .map(|(concept, sources)| {
                let confidence = bounded_confidence(0.5 + 0.1 * sources.len() as f64, CONFIDENCE_CAP);
                Pattern::new(
                    PatternKind::CrossSourceConcept {
                        concept: concept.to_string(),
                        sources,
                    },
                    confidence,
                )
            })
            .collect()
    }
}

/// Sources with more than five events in the window
pub struct HighActivityDetector;

impl Detector for HighActivityDetector {
    fn name(&self) -> &'static str {
        "high_activity"
    }

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for source in snapshot.events.iter().filter_map(|e| e.source.as_deref()) {
            *counts.entry(source).or_default() += 1;
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count > HIGH_ACTIVITY_THRESHOLD)
            .map(|(source, count)| {
                let confidence = bounded_confidence(0.6 + 0.02 * count as f64, CONFIDENCE_CAP);
                Pattern::new(
                    PatternKind::HighActivity {
                        source: source.to_string(),
                        count,
                    },
                    confidence,
                )
            })
            .collect()
    }
}

/// Commands invoked three or more times
pub struct CliMasteryDetector;

impl Detector for CliMasteryDetector {
    fn name(&self) -> &'static str {
        "cli_mastery"
    }

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for command in snapshot
            .events
            .iter()
            .filter(|e| is_command_event(e))
            .filter_map(command_of)
        {
            *counts.entry(command).or_default() += 1;
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count >= CLI_MASTERY_THRESHOLD)
            .map(|(command, count)| {
                let confidence = bounded_confidence(0.7 + 0.05 * count as f64, CONFIDENCE_CAP);
                Pattern::new(PatternKind::CliMastery { command, count }, confidence)
            })
            .collect()
    }
}

/// Concepts learned two or more times within twelve hours
pub struct RapidReinforcementDetector;

impl Detector for RapidReinforcementDetector {
    fn name(&self) -> &'static str {
        "rapid_reinforcement"
    }

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let mut times_by_concept: BTreeMap<&str, Vec<DateTime<Utc>>> = BTreeMap::new();
        for learning in snapshot.learnings {
            times_by_concept
                .entry(learning.concept.as_str())
                .or_default()
                .push(learning.created_at);
        }

        let mut patterns = Vec::new();
        for (concept, times) in times_by_concept {
            if times.len() < 2 {
                continue;
            }
            let (Some(earliest), Some(latest)) = (times.iter().min(), times.iter().max()) else {
                continue;
            };
            let span_hours = (*latest - *earliest).num_seconds() as f64 / 3600.0;
            if span_hours > REINFORCEMENT_SPAN_HOURS {
                continue;
            }

            let count = times.len();
            let confidence = bounded_confidence(0.8 + 0.05 * count as f64, CONFIDENCE_CAP);
            patterns.push(Pattern::new(
                PatternKind::RapidReinforcement {
                    concept: concept.to_string(),
                    count,
                    span_hours: (span_hours * 10.0).round() / 10.0,
                },
                confidence,
            ));
        }
        patterns
    }
}

/// Clock hours holding three or more events
pub struct WorkflowActivityDetector;

impl Detector for WorkflowActivityDetector {
    fn name(&self) -> &'static str {
        "workflow_activity"
    }

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
        for event in snapshot.events {
            *buckets.entry(event.timestamp.format("%Y-%m-%dT%H").to_string()).or_default() += 1;
        }

        buckets
            .into_iter()
            .filter(|(_, count)| *count >= WORKFLOW_CLUSTER_THRESHOLD)
            .map(|(hour, count)| {
                Pattern::new(PatternKind::WorkflowActivity { hour, count }, WORKFLOW_CONFIDENCE)
            })
            .collect()
    }
}

/// Adjacent events whose sources differ. Noisy, so not part of the
/// default bank.
pub struct SourceTransitionDetector {
    lookback: usize,
}

impl SourceTransitionDetector {
    pub fn new(lookback: usize) -> Self {
        Self { lookback }
    }
}

impl Detector for SourceTransitionDetector {
    fn name(&self) -> &'static str {
        "source_transition"
    }

    fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let sources: Vec<&str> = snapshot
            .events
            .iter()
            .filter_map(|e| e.source.as_deref())
            .take(self.lookback)
            .collect();

        sources
            .windows(2)
            .filter(|pair| pair[0] != pair[1])
            .map(|pair| {
                Pattern::new(
                    PatternKind::SourceTransition {
                        from: pair[0].to_string(),
                        to: pair[1].to_string(),
                    },
                    TRANSITION_CONFIDENCE,
                )
            })
            .collect()
    }
}
