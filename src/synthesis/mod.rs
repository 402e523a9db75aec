//! Insight Synthesizer
//!
//! Turns a pattern into a titled, explained insight. The mapping is a
//! plain match over [`PatternKind`], so a new variant cannot be added
//! without deciding how it reads.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::detection::{Pattern, PatternKind};
use crate::types::{Insight, InsightSource};

/// A cycle producing more patterns than this also gets an aggregate insight
pub const AGGREGATE_THRESHOLD: usize = 3;

/// Confidence of the cycle-level aggregate insight
pub const AGGREGATE_CONFIDENCE: f64 = 0.85;

/// Concepts quoted in the aggregate insight
const AGGREGATE_SAMPLE_CONCEPTS: usize = 3;

const AGGREGATE_PATTERN_TYPE: &str = "aggregated_insight";

/// Build the insight for a single pattern
pub fn synthesize(pattern: &Pattern) -> Insight {
    synthesize_at(pattern, Utc::now())
}

pub fn synthesize_at(pattern: &Pattern, now: DateTime<Utc>) -> Insight {
    let (concept, context) = match &pattern.kind {
        PatternKind::CrossSourceConcept { concept, sources } => (
            format!("Multi-domain learning: {}", concept),
            format!(
                "You learned about \"{}\" from {} different sources: {}. This indicates strong interest or practical importance. The concept spans multiple domains of your work.",
                concept,
                sources.len(),
                sources.join(", ")
            ),
        ),
        PatternKind::HighActivity { source, count } => (
            format!("Focus area detected: {}", source),
            format!(
                "High activity detected in {} ({} events). This suggests focused attention or a project requiring intensive work. Consider creating focused learning events to capture key learnings from this session.",
                source, count
            ),
        ),
        PatternKind::CliMastery { command, count } => (
            format!("CLI proficiency: {} (used {}x)", command, count),
            format!(
                "You used \"{}\" {} times recently. This command is becoming a core tool in your workflow. Consider documenting best practices or creating a learning entry for advanced usage patterns.",
                command, count
            ),
        ),
        PatternKind::RapidReinforcement { concept, count, span_hours } => (
            format!("Learning acceleration: {}", concept),
            format!(
                "The concept \"{}\" was reinforced {} times within {:.1} hours. This rapid repetition suggests either high practical relevance or a knowledge gap worth addressing more systematically.",
                concept, count, span_hours
            ),
        ),
        PatternKind::WorkflowActivity { hour, count } => (
            format!("Workflow pattern: {} ({} events)", hour, count),
            format!(
                "A cluster of {} events occurred around {}. This pattern suggests an automated workflow or focused work session. Consider if this workflow can be further optimized or documented.",
                count, hour
            ),
        ),
        PatternKind::SourceTransition { from, to } => (
            format!("Context shift: {} → {}", from, to),
            format!(
                "Detected a context shift from {} to {}. This cross-source activity pattern may indicate workflow integration or knowledge transfer between different tools/platforms.",
                from, to
            ),
        ),
        PatternKind::Custom { name, .. } => (
            format!("Pattern insight: {}", name),
            format!(
                "Pattern detected: {}",
                serde_json::to_string(pattern).unwrap_or_else(|_| name.clone())
            ),
        ),
    };

    Insight {
        concept,
        context,
        confidence: pattern.confidence.clamp(0.0, 1.0),
        source: InsightSource::Insight,
        pattern_type: pattern.variant().to_string(),
        metadata: json!({
            "pattern_type": pattern.variant(),
            "source": pattern.source_attribution(),
            "timestamp": now.to_rfc3339(),
            "pattern_data": pattern,
        }),
        created_at: now,
    }
}

/// Build the cycle-level summary when more than [`AGGREGATE_THRESHOLD`]
/// patterns were found
pub fn synthesize_aggregate(patterns: &[Pattern]) -> Option<Insight> {
    synthesize_aggregate_at(patterns, Utc::now())
}

pub fn synthesize_aggregate_at(patterns: &[Pattern], now: DateTime<Utc>) -> Option<Insight> {
    if patterns.len() <= AGGREGATE_THRESHOLD {
        return None;
    }

    let mut types: Vec<&str> = Vec::new();
    let mut sources: Vec<&str> = Vec::new();
    let mut concepts: Vec<&str> = Vec::new();

    for pattern in patterns {
        if !types.contains(&pattern.variant()) {
            types.push(pattern.variant());
        }
        for source in pattern.sources() {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        if let Some(concept) = pattern.concept() {
            concepts.push(concept);
        }
    }

    let sample: Vec<&str> = concepts.iter().take(AGGREGATE_SAMPLE_CONCEPTS).copied().collect();

    Some(Insight {
        concept: format!(
            "Daily intelligence: {} pattern types across {} sources",
            types.len(),
            sources.len()
        ),
        context: format!(
            "Your activity revealed {} distinct patterns across {} sources ({}). Key concepts: {}. This cross-source intelligence helps identify learning opportunities and workflow optimizations.",
            types.len(),
            sources.len(),
            sources.join(", "),
            sample.join(", ")
        ),
        confidence: AGGREGATE_CONFIDENCE,
        source: InsightSource::Insight,
        pattern_type: AGGREGATE_PATTERN_TYPE.to_string(),
        metadata: json!({
            "pattern_type": AGGREGATE_PATTERN_TYPE,
            "source": "multi",
            "timestamp": now.to_rfc3339(),
            "pattern_data": {
                "types": types,
                "sources": sources,
                "concepts": concepts,
                "count": patterns.len(),
            },
        }),
        created_at: now,
    })
}

/// Per-pattern insights followed by the aggregate, if any
pub fn synthesize_all(patterns: &[Pattern], now: DateTime<Utc>) -> Vec<Insight> {
    let mut insights: Vec<Insight> = patterns.iter().map(|p| synthesize_at(p, now)).collect();
    insights.extend(synthesize_aggregate_at(patterns, now));
    insights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(command: &str, count: usize) -> Pattern {
        Pattern::new(
            PatternKind::CliMastery { command: command.to_string(), count },
            0.85,
        )
    }

    #[test]
    fn test_synthesize_cli_mastery() {
        let insight = synthesize(&cli("curl", 3));
        assert_eq!(insight.concept, "CLI proficiency: curl (used 3x)");
        assert!(insight.context.contains("\"curl\" 3 times"));
        assert_eq!(insight.confidence, 0.85);
        assert_eq!(insight.pattern_type, "cli_mastery");
        assert_eq!(insight.metadata["pattern_data"]["command"], "curl");
        assert_eq!(insight.metadata["source"], "multi");
    }

    #[test]
    fn test_synthesize_high_activity_attribution() {
        let pattern = Pattern::new(PatternKind::HighActivity { source: "github".into(), count: 6 }, 0.72);
        let insight = synthesize(&pattern);
        assert_eq!(insight.concept, "Focus area detected: github");
        assert_eq!(insight.metadata["source"], "github");
        assert_eq!(insight.metadata["pattern_type"], "high_activity");
    }

    #[test]
    fn test_unrecognized_variant_falls_back() {
        let pattern = Pattern::new(PatternKind::Custom { name: "mystery".into(), count: 2 }, 0.3);
        let insight = synthesize(&pattern);
        assert_eq!(insight.concept, "Pattern insight: mystery");
        assert!(insight.context.starts_with("Pattern detected: "));
        assert_eq!(insight.confidence, 0.3);
    }

    #[test]
    fn test_no_aggregate_at_threshold() {
        let patterns: Vec<Pattern> = (0..3).map(|i| cli(&format!("c{}", i), 3)).collect();
        assert!(synthesize_aggregate(&patterns).is_none());
        assert_eq!(synthesize_all(&patterns, Utc::now()).len(), 3);
    }

    #[test]
    fn test_aggregate_above_threshold() {
        let patterns = vec![
            cli("curl", 3),
            Pattern::new(PatternKind::HighActivity { source: "cli".into(), count: 7 }, 0.74),
            Pattern::new(
                PatternKind::CrossSourceConcept { concept: "A".into(), sources: vec!["x".into(), "y".into()] },
                0.7,
            ),
            Pattern::new(
                PatternKind::RapidReinforcement { concept: "B".into(), count: 2, span_hours: 1.0 },
                0.9,
            ),
            Pattern::new(
                PatternKind::CrossSourceConcept { concept: "C".into(), sources: vec!["x".into(), "z".into()] },
                0.7,
            ),
            Pattern::new(
                PatternKind::RapidReinforcement { concept: "D".into(), count: 2, span_hours: 1.0 },
                0.9,
            ),
        ];

        let all = synthesize_all(&patterns, Utc::now());
        let aggregates: Vec<&Insight> = all.iter().filter(|i| i.pattern_type == "aggregated_insight").collect();
        assert_eq!(aggregates.len(), 1);

        let aggregate = aggregates[0];
        assert_eq!(aggregate.confidence, 0.85);
        assert_eq!(aggregate.concept, "Daily intelligence: 4 pattern types across 1 sources");
        assert!(aggregate.context.contains("Key concepts: A, B, C."));
        assert_eq!(aggregate.metadata["pattern_data"]["count"], 6);
    }
}
