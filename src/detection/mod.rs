//! Pattern Detector Bank
//!
//! Runs a fixed set of independent detectors over one immutable snapshot of
//! the log. Every detector returns its own list; the bank concatenates them,
//! so adding a detector never changes callers.

pub mod command;
pub mod detectors;
pub mod pattern;

use tracing::debug;

use crate::config::DetectionConfig;
use crate::types::{Event, Learning, Note};

pub use command::{extract_command, normalize_command};
pub use detectors::{
    CliMasteryDetector, CrossSourceConceptDetector, Detector, HighActivityDetector,
    RapidReinforcementDetector, SourceTransitionDetector, WorkflowActivityDetector,
};
pub use pattern::{Pattern, PatternKind};

/// Read-only view over the records fetched for one cycle
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// Newest first
    pub events: &'a [Event],
    pub notes: &'a [Note],
    pub learnings: &'a [Learning],
}

/// Ordered collection of detectors
pub struct DetectorBank {
    detectors: Vec<Box<dyn Detector>>,
}

impl Default for DetectorBank {
    /// The five detectors wired into the default pipeline
    fn default() -> Self {
        Self {
            detectors: vec![
                Box::new(CrossSourceConceptDetector),
                Box::new(HighActivityDetector),
                Box::new(CliMasteryDetector),
                Box::new(RapidReinforcementDetector),
                Box::new(WorkflowActivityDetector),
            ],
        }
    }
}

impl DetectorBank {
    /// Default bank plus whatever the config opts into
    pub fn from_config(config: &DetectionConfig) -> Self {
        let bank = Self::default();
        if config.source_transitions {
            bank.with(SourceTransitionDetector::new(config.transition_lookback))
        } else {
            bank
        }
    }

    /// Register an additional detector
    pub fn with(mut self, detector: impl Detector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run every detector over the snapshot
    pub fn detect(&self, snapshot: &Snapshot<'_>) -> Vec<Pattern> {
        let mut patterns = Vec::new();
        for detector in &self.detectors {
            let found = detector.detect(snapshot);
            debug!(detector = detector.name(), found = found.len(), "detector finished");
            patterns.extend(found);
        }
        patterns
    }
}

/// Run the default bank over the given records
pub fn detect_all(events: &[Event], notes: &[Note], learnings: &[Learning]) -> Vec<Pattern> {
    DetectorBank::default().detect(&Snapshot {
        events,
        notes,
        learnings,
    })
}
