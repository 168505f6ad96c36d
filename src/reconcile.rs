//! One feedback cycle: turn session feedback into a [`PortraitDelta`],
//! fold it into the portrait, update counters, reconcile the pending-task
//! list, and compute the user-facing "what changed" diff.

use std::collections::HashMap;

use crate::language::Language;
use crate::models::{ActionTask, TaskStatus, TaskUsefulness};
use crate::portrait::{truncate_chars, PortraitDelta, TaskStats, UserPortrait, SUMMARY_MAX_CHARS};

const SUMMARY_PREVIEW_CHARS: usize = 160;
const WEIGHT_DIFF_THRESHOLD: f64 = 0.1;
const WEIGHT_DIFF_CAP: usize = 6;

/// Everything the user handed back from the summary sheet.
#[derive(Debug, Clone, Default)]
pub struct SessionFeedback {
    /// Summary as (possibly) edited by the user; empty means "keep the
    /// generated one".
    pub edited_summary: String,
    pub thumbs_up: Option<bool>,
    /// Qualitative complaint tags, e.g. "too_long", "too_dry".
    pub flags: Vec<String>,
    /// Per-task status + usefulness ratings.
    pub task_feedback: Vec<ActionTask>,
    pub language: Language,
}

/// View-facing before/after diff of one reconciliation. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SessionHighlights {
    pub summary_updated: bool,
    pub summary_preview: Option<String>,
    pub new_focus_areas: Vec<String>,
    pub new_strategies: Vec<String>,
    pub weight_ups: Vec<(String, f64)>,
    pub weight_downs: Vec<(String, f64)>,
}

#[derive(Debug)]
pub struct ReconcileResult {
    pub portrait: UserPortrait,
    pub highlights: SessionHighlights,
    /// The pending list to persist (open tasks only, full replace).
    pub pending: Vec<ActionTask>,
    /// Tasks resolved this cycle (done/skipped). Not stored; returned so a
    /// front end can keep its own history.
    pub resolved: Vec<ActionTask>,
}

struct KeywordEntry {
    keywords: &'static [&'static str],
    preference_key: &'static str,
    label_uk: &'static str,
    label_en: &'static str,
}

/// The single keyword table behind strategy labels and inferred preference
/// keys. Ordered; first match wins.
const KEYWORD_TABLE: &[KeywordEntry] = &[
    KeywordEntry {
        keywords: &["дихан", "breath"],
        preference_key: "breathing",
        label_uk: "Дихальні вправи 4-6",
        label_en: "Breathing exercise 4-6",
    },
    KeywordEntry {
        keywords: &["журнал", "запис", "journal"],
        preference_key: "journaling",
        label_uk: "Короткий джорналінг",
        label_en: "Short journaling",
    },
    KeywordEntry {
        keywords: &["прогулян", "walk"],
        preference_key: "walking",
        label_uk: "Коротка прогулянка",
        label_en: "Short walk",
    },
];

fn keyword_entry_for(task: &ActionTask) -> Option<&'static KeywordEntry> {
    let text = task.matchable_text();
    KEYWORD_TABLE
        .iter()
        .find(|entry| entry.keywords.iter().any(|kw| text.contains(kw)))
}

/// Normalized strategy label for a task that worked. Unmatched tasks
/// contribute their verbatim title.
pub fn strategy_label_for(task: &ActionTask, language: Language) -> String {
    match keyword_entry_for(task) {
        Some(entry) => match language {
            Language::Ukrainian => entry.label_uk.to_string(),
            Language::English => entry.label_en.to_string(),
        },
        None => task.title.clone(),
    }
}

/// Preference key a task speaks to, if any.
pub fn preference_key_for(task: &ActionTask) -> Option<&'static str> {
    keyword_entry_for(task).map(|entry| entry.preference_key)
}

fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
}

/// Map an English technique name from the model to its Ukrainian canonical
/// label; Cyrillic input passes through untouched.
pub fn localize_strategy(strategy: &str) -> String {
    if contains_cyrillic(strategy) {
        return strategy.to_string();
    }
    let lower = strategy.to_lowercase();
    let table: &[(&str, &str)] = &[
        ("breath", "Дихальні вправи 4-6"),
        ("journal", "Короткий джорналінг"),
        ("walk", "Коротка прогулянка"),
        ("meditat", "Коротка медитація"),
        ("ground", "Граундінг 5-4-3-2-1"),
        ("stretch", "Розтяжка 5 хвилин"),
        ("gratitude", "Практика вдячності"),
        ("music", "Спокійна музика 5 хв"),
    ];
    for (keyword, label) in table {
        if lower.contains(keyword) {
            return label.to_string();
        }
    }
    strategy.to_string()
}

/// A task earns a strategy when it was rated highly useful, or completed
/// without being rated useless.
fn task_worked(task: &ActionTask) -> bool {
    task.usefulness == TaskUsefulness::High
        || (task.status == TaskStatus::Done && task.usefulness != TaskUsefulness::Low)
}

pub fn derive_strategies(feedback: &SessionFeedback) -> Vec<String> {
    feedback
        .task_feedback
        .iter()
        .filter(|task| task_worked(task))
        .map(|task| strategy_label_for(task, feedback.language))
        .filter(|label| !label.is_empty())
        .collect()
}

pub fn derive_weight_updates(feedback: &SessionFeedback) -> HashMap<String, f64> {
    let mut updates: HashMap<String, f64> = HashMap::new();

    if let Some(thumbs_up) = feedback.thumbs_up {
        let signal = if thumbs_up { 0.8 } else { 0.2 };
        updates.insert("tone_supportive".to_string(), signal);
    }
    if feedback.flags.iter().any(|f| f == "too_long") {
        updates.insert("pref_length".to_string(), 0.1);
    }
    if feedback.flags.iter().any(|f| f == "too_dry") {
        updates.insert("tone_warmth".to_string(), 0.8);
    }

    // Task ratings speak to inferred preference keys; strongest signal wins
    // when several tasks map to the same key.
    for task in &feedback.task_feedback {
        let Some(key) = preference_key_for(task) else {
            continue;
        };
        let signal = task.usefulness.as_signal();
        let entry = updates.entry(key.to_string()).or_insert(0.0);
        *entry = entry.max(signal);
    }

    updates
}

pub fn build_delta(feedback: &SessionFeedback, generated_summary: &str) -> PortraitDelta {
    let edited = feedback.edited_summary.trim();
    let base_summary = if edited.is_empty() {
        generated_summary
    } else {
        edited
    };

    PortraitDelta {
        summary: Some(truncate_chars(base_summary, SUMMARY_MAX_CHARS)),
        new_strategies: derive_strategies(feedback),
        weight_updates: derive_weight_updates(feedback),
        focus_areas: Vec::new(),
    }
}

pub fn apply_task_stats(stats: &mut TaskStats, tasks: &[ActionTask]) {
    for task in tasks {
        stats.total_suggested += 1;
        match task.status {
            TaskStatus::Done => stats.completed += 1,
            TaskStatus::Skipped => stats.skipped += 1,
            TaskStatus::Pending | TaskStatus::NotSet => {}
        }
        match task.usefulness {
            TaskUsefulness::High => stats.usefulness_high += 1,
            TaskUsefulness::Medium => stats.usefulness_medium += 1,
            TaskUsefulness::Low => stats.usefulness_low += 1,
            TaskUsefulness::NotSet => {}
        }
    }
}

/// Overlay feedback onto the stored pending list (update by id, append
/// unknown), then split into the open tasks to persist and the resolved
/// ones to hand back.
pub fn overlay_pending(
    mut existing: Vec<ActionTask>,
    feedback: &[ActionTask],
) -> (Vec<ActionTask>, Vec<ActionTask>) {
    for fb in feedback {
        if let Some(task) = existing.iter_mut().find(|t| t.id == fb.id) {
            task.status = fb.status;
            task.usefulness = fb.usefulness;
        } else {
            existing.push(fb.clone());
        }
    }

    let (pending, resolved) = existing
        .into_iter()
        .partition(|task| task.status.is_open());
    (pending, resolved)
}

pub fn diff_highlights(old: &UserPortrait, new: &UserPortrait) -> SessionHighlights {
    let mut highlights = SessionHighlights {
        summary_updated: new.summary.trim() != old.summary.trim(),
        ..Default::default()
    };
    if highlights.summary_updated {
        highlights.summary_preview = Some(truncate_chars(&new.summary, SUMMARY_PREVIEW_CHARS));
    }

    highlights.new_focus_areas = new
        .focus_areas
        .iter()
        .filter(|area| !old.focus_areas.contains(area))
        .cloned()
        .collect();
    highlights.new_strategies = new
        .helpful_strategies
        .iter()
        .filter(|strategy| !old.helpful_strategies.contains(strategy))
        .cloned()
        .collect();

    let mut keys: Vec<&String> = old
        .preference_weights
        .keys()
        .chain(new.preference_weights.keys())
        .collect();
    keys.sort();
    keys.dedup();

    let mut deltas: Vec<(String, f64)> = keys
        .into_iter()
        .map(|key| {
            let before = old.preference_weights.get(key).copied().unwrap_or(0.0);
            let after = new.preference_weights.get(key).copied().unwrap_or(0.0);
            (key.clone(), after - before)
        })
        .filter(|(_, delta)| delta.abs() >= WEIGHT_DIFF_THRESHOLD)
        .collect();
    deltas.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    deltas.truncate(WEIGHT_DIFF_CAP);

    highlights.weight_ups = deltas.iter().filter(|(_, d)| *d > 0.0).cloned().collect();
    highlights.weight_downs = deltas.iter().filter(|(_, d)| *d < 0.0).cloned().collect();
    highlights
}

/// One full reconciliation over snapshots. Pure: the caller persists the
/// result and owns any locking.
pub fn reconcile(
    portrait_before: &UserPortrait,
    pending_before: Vec<ActionTask>,
    feedback: &SessionFeedback,
    generated_summary: &str,
) -> ReconcileResult {
    let mut portrait = portrait_before.clone();

    let delta = build_delta(feedback, generated_summary);
    portrait.merge(&delta);
    apply_task_stats(&mut portrait.task_stats, &feedback.task_feedback);

    let (pending, resolved) = overlay_pending(pending_before, &feedback.task_feedback);
    let highlights = diff_highlights(portrait_before, &portrait);

    ReconcileResult {
        portrait,
        highlights,
        pending,
        resolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rated(title: &str, status: TaskStatus, usefulness: TaskUsefulness) -> ActionTask {
        let mut task = ActionTask::new(title, None);
        task.status = status;
        task.usefulness = usefulness;
        task
    }

    #[test]
    fn breathing_task_scenario() {
        let feedback = SessionFeedback {
            task_feedback: vec![rated(
                "Breathing exercise",
                TaskStatus::Done,
                TaskUsefulness::High,
            )],
            language: Language::English,
            ..Default::default()
        };

        let result = reconcile(&UserPortrait::empty(), Vec::new(), &feedback, "Summary.");

        assert!(result
            .portrait
            .helpful_strategies
            .contains(&"Breathing exercise 4-6".to_string()));
        // 0.5 default blended with the 1.0 high-usefulness signal.
        let weight = result.portrait.preference_weights["breathing"];
        assert!((weight - 0.575).abs() < 1e-9);
        assert_eq!(result.portrait.task_stats.total_suggested, 1);
        assert_eq!(result.portrait.task_stats.completed, 1);
        assert_eq!(result.portrait.task_stats.usefulness_high, 1);
    }

    #[test]
    fn thumbs_down_with_too_long_flag() {
        let feedback = SessionFeedback {
            thumbs_up: Some(false),
            flags: vec!["too_long".to_string()],
            ..Default::default()
        };

        let result = reconcile(&UserPortrait::empty(), Vec::new(), &feedback, "Summary.");

        // Both keys drift below the 0.5 default toward their signals.
        assert!(result.portrait.preference_weights["tone_supportive"] < 0.5);
        assert!(result.portrait.preference_weights["pref_length"] < 0.5);
        assert!(result.portrait.preference_weights["pref_length"] > 0.1);
    }

    #[test]
    fn too_dry_flag_raises_warmth() {
        let feedback = SessionFeedback {
            flags: vec!["too_dry".to_string()],
            ..Default::default()
        };
        let updates = derive_weight_updates(&feedback);
        assert_eq!(updates["tone_warmth"], 0.8);
    }

    #[test]
    fn strongest_signal_wins_for_shared_preference_key() {
        let feedback = SessionFeedback {
            task_feedback: vec![
                rated("Morning walk", TaskStatus::Skipped, TaskUsefulness::Low),
                rated("Evening walk", TaskStatus::Done, TaskUsefulness::High),
            ],
            ..Default::default()
        };
        let updates = derive_weight_updates(&feedback);
        assert_eq!(updates["walking"], 1.0);
    }

    #[test]
    fn unmatched_good_task_contributes_verbatim_title() {
        let feedback = SessionFeedback {
            task_feedback: vec![rated(
                "Call an old friend",
                TaskStatus::Done,
                TaskUsefulness::Medium,
            )],
            language: Language::English,
            ..Default::default()
        };
        assert_eq!(
            derive_strategies(&feedback),
            vec!["Call an old friend".to_string()]
        );
    }

    #[test]
    fn done_but_low_usefulness_earns_no_strategy() {
        let feedback = SessionFeedback {
            task_feedback: vec![rated(
                "Breathing drill",
                TaskStatus::Done,
                TaskUsefulness::Low,
            )],
            ..Default::default()
        };
        assert!(derive_strategies(&feedback).is_empty());
    }

    #[test]
    fn edited_summary_overrides_generated_one() {
        let feedback = SessionFeedback {
            edited_summary: "  My own words.  ".to_string(),
            ..Default::default()
        };
        let delta = build_delta(&feedback, "Generated text.");
        assert_eq!(delta.summary.as_deref(), Some("My own words."));
    }

    #[test]
    fn pending_list_drops_done_and_skipped() {
        let open = rated("Keep me", TaskStatus::Pending, TaskUsefulness::NotSet);
        let done = rated("Done one", TaskStatus::Done, TaskUsefulness::High);
        let skipped = rated("Skipped one", TaskStatus::Skipped, TaskUsefulness::NotSet);
        let existing = vec![open.clone(), done.clone(), skipped.clone()];

        let (pending, resolved) = overlay_pending(existing, &[done.clone(), skipped.clone()]);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open.id);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn overlay_updates_by_id_and_appends_unknown() {
        let stored = rated("Stored", TaskStatus::Pending, TaskUsefulness::NotSet);
        let mut update = stored.clone();
        update.status = TaskStatus::Pending;
        update.usefulness = TaskUsefulness::Medium;
        let fresh = rated("Fresh", TaskStatus::NotSet, TaskUsefulness::NotSet);

        let (pending, resolved) = overlay_pending(vec![stored.clone()], &[update, fresh.clone()]);

        assert!(resolved.is_empty());
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].usefulness, TaskUsefulness::Medium);
        assert_eq!(pending[1].id, fresh.id);
    }

    #[test]
    fn highlights_report_new_material_and_weight_moves() {
        let mut old = UserPortrait::empty();
        old.summary = "Old summary.".to_string();
        old.helpful_strategies = vec!["breathing".to_string()];
        old.preference_weights
            .insert("tone_warmth".to_string(), 0.2);

        let mut new = old.clone();
        new.summary = "New summary with more detail.".to_string();
        new.helpful_strategies.push("walking".to_string());
        new.focus_areas.push("sleep".to_string());
        new.preference_weights
            .insert("tone_warmth".to_string(), 0.45);
        new.preference_weights
            .insert("pref_length".to_string(), 0.05); // |Δ| below threshold

        let highlights = diff_highlights(&old, &new);

        assert!(highlights.summary_updated);
        assert_eq!(
            highlights.summary_preview.as_deref(),
            Some("New summary with more detail.")
        );
        assert_eq!(highlights.new_focus_areas, vec!["sleep".to_string()]);
        assert_eq!(highlights.new_strategies, vec!["walking".to_string()]);
        assert_eq!(highlights.weight_ups.len(), 1);
        assert_eq!(highlights.weight_ups[0].0, "tone_warmth");
        assert!(highlights.weight_downs.is_empty());
    }

    #[test]
    fn highlights_cap_weight_deltas_at_six() {
        let old = UserPortrait::empty();
        let mut new = UserPortrait::empty();
        for i in 0..10 {
            new.preference_weights.insert(format!("key_{i}"), 0.9);
        }
        let highlights = diff_highlights(&old, &new);
        assert_eq!(
            highlights.weight_ups.len() + highlights.weight_downs.len(),
            6
        );
    }

    #[test]
    fn localize_strategy_maps_known_english_names() {
        assert_eq!(localize_strategy("Deep breathing"), "Дихальні вправи 4-6");
        assert_eq!(localize_strategy("5-minute stretch"), "Розтяжка 5 хвилин");
        assert_eq!(localize_strategy("Щось своє"), "Щось своє");
        assert_eq!(localize_strategy("Cold shower"), "Cold shower");
    }
}
