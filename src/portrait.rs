use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard bounds on the portrait. Deltas may exceed these; the merge clamps.
pub const SUMMARY_MAX_CHARS: usize = 800;
pub const FOCUS_AREA_CAP: usize = 5;
pub const STRATEGY_CAP: usize = 8;

/// Summary accretion: keep the head of the old summary, append a slice of
/// the new one, and drop the new text entirely when its opening already
/// appears in what we kept.
const SUMMARY_KEEP_OLD_CHARS: usize = 480;
const SUMMARY_APPEND_CHARS: usize = 260;
const SUMMARY_DEDUP_HEAD_CHARS: usize = 80;

/// Smoothing: heavy inertia so one noisy session cannot swing a trait,
/// while repeated sessions still drift the value.
const WEIGHT_INERTIA: f64 = 0.85;
const WEIGHT_SIGNAL: f64 = 0.15;
const WEIGHT_DEFAULT: f64 = 0.5;

/// Summaries containing one of these (lower-cased) are treated as the
/// "first session, not enough material" placeholder and replaced outright.
const PLACEHOLDER_PHRASES: &[&str] = &["початкова сесія", "initial session"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskStats {
    pub total_suggested: u32,
    pub completed: u32,
    pub skipped: u32,
    pub usefulness_high: u32,
    pub usefulness_medium: u32,
    pub usefulness_low: u32,
}

/// The cumulative user profile. One per device; mutated only through
/// [`UserPortrait::merge`] or reset wholesale to [`UserPortrait::empty`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPortrait {
    pub summary: String,
    pub focus_areas: Vec<String>,
    pub helpful_strategies: Vec<String>,
    pub preference_weights: HashMap<String, f64>,
    pub task_stats: TaskStats,
    pub last_updated: DateTime<Utc>,
}

impl Default for UserPortrait {
    fn default() -> Self {
        Self::empty()
    }
}

/// An ephemeral change-set produced from one session (user feedback or an
/// LLM regeneration). Folded into the portrait by `merge` and discarded.
#[derive(Debug, Clone, Default)]
pub struct PortraitDelta {
    pub summary: Option<String>,
    pub new_strategies: Vec<String>,
    pub weight_updates: HashMap<String, f64>,
    pub focus_areas: Vec<String>,
}

impl UserPortrait {
    pub fn empty() -> Self {
        Self {
            summary: String::new(),
            focus_areas: Vec::new(),
            helpful_strategies: Vec::new(),
            preference_weights: HashMap::new(),
            task_stats: TaskStats::default(),
            last_updated: Utc::now(),
        }
    }

    /// Fold a delta into the portrait.
    ///
    /// Total and deterministic: malformed fields are clamped or ignored,
    /// never rejected. Fixed order: summary, strategies, focus areas,
    /// weights, timestamp.
    pub fn merge(&mut self, delta: &PortraitDelta) {
        if let Some(incoming) = delta.summary.as_deref().map(str::trim) {
            if !incoming.is_empty() {
                self.summary = merged_summary(&self.summary, incoming);
            }
        }

        self.helpful_strategies = dedup_capped(
            self.helpful_strategies
                .iter()
                .chain(delta.new_strategies.iter()),
            STRATEGY_CAP,
        );

        if delta.focus_areas.is_empty() {
            // Normalization pass; repairs any prior invariant violation.
            self.focus_areas = dedup_capped(self.focus_areas.iter(), FOCUS_AREA_CAP);
        } else {
            self.focus_areas = dedup_capped(
                self.focus_areas.iter().chain(delta.focus_areas.iter()),
                FOCUS_AREA_CAP,
            );
        }

        for (key, signal) in &delta.weight_updates {
            let old = self
                .preference_weights
                .get(key)
                .copied()
                .unwrap_or(WEIGHT_DEFAULT);
            let signal = signal.clamp(0.0, 1.0);
            let blended = (old * WEIGHT_INERTIA + signal * WEIGHT_SIGNAL).clamp(0.0, 1.0);
            self.preference_weights.insert(key.clone(), blended);
        }

        self.last_updated = Utc::now();
    }
}

/// Reconcile an incoming summary with the current one, bounding growth.
fn merged_summary(current: &str, incoming: &str) -> String {
    let old = current.trim();
    let new = incoming.trim();
    if old.is_empty() {
        return truncate_chars(new, SUMMARY_MAX_CHARS);
    }

    let old_lower = old.to_lowercase();
    if PLACEHOLDER_PHRASES.iter().any(|p| old_lower.contains(p)) {
        return truncate_chars(new, SUMMARY_MAX_CHARS);
    }

    let keep_old = truncate_chars(old, SUMMARY_KEEP_OLD_CHARS);
    let new_head = truncate_chars(new, SUMMARY_DEDUP_HEAD_CHARS).to_lowercase();
    if keep_old.to_lowercase().contains(&new_head) {
        // The model restated its opening idea; keep only what we had.
        return truncate_chars(&keep_old, SUMMARY_MAX_CHARS);
    }

    let add_new = truncate_chars(new, SUMMARY_APPEND_CHARS);
    let combined = format!("{keep_old} {add_new}");
    truncate_chars(combined.trim(), SUMMARY_MAX_CHARS)
}

/// First `max` characters of `input` (chars, not bytes).
pub(crate) fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Union preserving first-seen order, capped.
fn dedup_capped<'a, I>(items: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if out.len() >= cap {
            break;
        }
        if seen.insert(item.as_str()) {
            out.push(item.clone());
        }
    }
    out
}
