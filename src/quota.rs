use std::sync::Arc;

use chrono::Utc;

use crate::store::PortraitStore;

/// Soft daily cap on outbound LLM calls.
///
/// `can_consume` / `consume` are a non-atomic pair: two racing callers can
/// slightly over-consume. Acceptable for this domain — the cap protects
/// against runaway usage, not abuse.
pub struct DailyQuota {
    store: Arc<dyn PortraitStore>,
    limit: u32,
}

impl DailyQuota {
    pub fn new(store: Arc<dyn PortraitStore>, limit: u32) -> Self {
        Self { store, limit }
    }

    fn today_key() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    pub fn can_consume(&self, amount: u32) -> bool {
        let used = self.store.quota_used(&Self::today_key());
        used + amount <= self.limit
    }

    pub fn consume(&self, amount: u32) {
        if let Err(error) = self.store.bump_quota(&Self::today_key(), amount) {
            tracing::warn!("Failed to record quota consumption: {}", error);
        }
    }

    pub fn remaining(&self) -> u32 {
        let used = self.store.quota_used(&Self::today_key());
        self.limit.saturating_sub(used)
    }
}
