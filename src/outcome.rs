//! Best-effort extraction of structured results from raw LLM text.
//!
//! Models drift from the requested format constantly: missing markers,
//! prose around the JSON, truncated arrays. Every parser here degrades to
//! an empty or partial result instead of failing.

use std::collections::HashMap;

use serde::Deserialize;

use crate::models::ActionTask;
use crate::portrait::PortraitDelta;

const SUMMARY_MARKERS: [&str; 2] = ["SUMMARY:", "ПІДСУМОК:"];
const TASKS_MARKERS: [&str; 2] = ["TASKS", "ЗАВДАННЯ"];

/// What a finalize call produced: a session summary plus suggested tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub summary: String,
    pub tasks: Vec<ActionTask>,
}

/// Split a finalize response into summary text and task list.
///
/// An empty summary means no marker was found; the caller falls back to
/// using the whole raw text.
pub fn parse_outcome(raw: &str) -> SessionOutcome {
    SessionOutcome {
        summary: extract_summary(raw),
        tasks: parse_tasks(raw),
    }
}

fn extract_summary(content: &str) -> String {
    let Some(start) = SUMMARY_MARKERS
        .iter()
        .find_map(|marker| content.find(marker).map(|idx| idx + marker.len()))
    else {
        return String::new();
    };

    let tail = &content[start..];
    let end = TASKS_MARKERS
        .iter()
        .filter_map(|marker| tail.find(marker))
        .min()
        .unwrap_or(tail.len());
    tail[..end].trim().to_string()
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Parse the bracketed JSON task array, dropping entries without a title.
fn parse_tasks(content: &str) -> Vec<ActionTask> {
    let Some(start) = content.find('[') else {
        return Vec::new();
    };
    let Some(end) = content.rfind(']') else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }

    let raw: Vec<serde_json::Value> = match serde_json::from_str(&content[start..=end]) {
        Ok(values) => values,
        Err(error) => {
            tracing::debug!("Task JSON did not parse, returning no tasks: {}", error);
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|value| serde_json::from_value::<RawTask>(value).ok())
        .filter_map(|task| {
            let title = task.title?;
            let title = title.trim();
            if title.is_empty() {
                return None;
            }
            Some(ActionTask::new(title, task.details))
        })
        .collect()
}

#[derive(Debug, Deserialize, Default)]
struct RawPortraitDelta {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, rename = "focusAreas")]
    focus_areas: Vec<String>,
    #[serde(default, rename = "helpfulStrategies")]
    helpful_strategies: Vec<String>,
    #[serde(default, rename = "preferenceWeights")]
    preference_weights: HashMap<String, f64>,
}

/// Parse a regeneration response (brace-delimited JSON object) into a delta.
///
/// Fields that are missing or mistyped default to empty; out-of-range
/// weights are clamped. A completely unparseable response yields an empty
/// delta, which the merge engine treats as a no-op on content.
pub fn parse_portrait_delta(raw: &str) -> PortraitDelta {
    let parsed = extract_braced_json(raw).unwrap_or_default();

    PortraitDelta {
        summary: parsed
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        new_strategies: parsed.helpful_strategies,
        weight_updates: parsed
            .preference_weights
            .into_iter()
            .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
            .collect(),
        focus_areas: parsed.focus_areas,
    }
}

fn extract_braced_json(raw: &str) -> Option<RawPortraitDelta> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&raw[start..=end]) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            tracing::debug!("Regeneration JSON did not parse: {}", error);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_summary_between_markers() {
        let raw = "SUMMARY:\nYou sounded calmer today.\n\nTASKS(JSON):\n[]";
        let outcome = parse_outcome(raw);
        assert_eq!(outcome.summary, "You sounded calmer today.");
        assert!(outcome.tasks.is_empty());
    }

    #[test]
    fn extracts_ukrainian_markers() {
        let raw = "ПІДСУМОК:\nСьогодні було легше.\nЗАВДАННЯ(JSON):\n[{\"title\": \"Прогулянка\"}]";
        let outcome = parse_outcome(raw);
        assert_eq!(outcome.summary, "Сьогодні було легше.");
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].title, "Прогулянка");
    }

    #[test]
    fn missing_marker_yields_empty_summary() {
        let outcome = parse_outcome("just some prose with no structure");
        assert!(outcome.summary.is_empty());
    }

    #[test]
    fn summary_runs_to_end_without_tasks_marker() {
        let outcome = parse_outcome("SUMMARY: short note, nothing else");
        assert_eq!(outcome.summary, "short note, nothing else");
    }

    #[test]
    fn tasks_missing_title_are_dropped() {
        let raw = r#"TASKS: [{"title": "Breathing"}, {"details": "orphan"}, {"title": "", "details": "blank"}]"#;
        let tasks = parse_tasks(raw);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Breathing");
    }

    #[test]
    fn garbage_between_brackets_yields_no_tasks() {
        assert!(parse_tasks("noise [this is not json] trailing").is_empty());
        assert!(parse_tasks("no brackets at all").is_empty());
        assert!(parse_tasks("] reversed [").is_empty());
    }

    #[test]
    fn tasks_survive_surrounding_prose() {
        let raw = "Here is what I suggest.\n[{\"title\": \"Walk\", \"details\": \"10 minutes\"}]\nTake care!";
        let tasks = parse_tasks(raw);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].details.as_deref(), Some("10 minutes"));
    }

    #[test]
    fn regeneration_json_maps_to_delta() {
        let raw = r#"Sure! {"summary": " Calmer overall. ", "focusAreas": ["sleep"],
            "helpfulStrategies": ["breathing"], "preferenceWeights": {"tone_warmth": 1.7}}"#;
        let delta = parse_portrait_delta(raw);
        assert_eq!(delta.summary.as_deref(), Some("Calmer overall."));
        assert_eq!(delta.focus_areas, vec!["sleep".to_string()]);
        assert_eq!(delta.new_strategies, vec!["breathing".to_string()]);
        assert_eq!(delta.weight_updates["tone_warmth"], 1.0);
    }

    #[test]
    fn unparseable_regeneration_yields_empty_delta() {
        let delta = parse_portrait_delta("the model rambled with no json");
        assert!(delta.summary.is_none());
        assert!(delta.new_strategies.is_empty());
        assert!(delta.weight_updates.is_empty());
        assert!(delta.focus_areas.is_empty());
    }
}
