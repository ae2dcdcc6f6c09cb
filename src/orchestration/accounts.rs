//! Versioned cache of account identity and alignment.

use crate::domain::{AccountId, AccountProfile, PersonaType, PoliticalAlignment, TimeMs};
use dashmap::DashMap;
use std::sync::Arc;

/// Every known alignment version per account, ascending by version.
///
/// Ingest reads the version effective at an event's timestamp, so a later
/// alignment change never rewrites how earlier engagements were classified.
#[derive(Debug, Default)]
pub struct AccountDirectory {
    versions: DashMap<AccountId, Vec<Arc<AccountProfile>>>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.versions.contains_key(id)
    }

    pub fn latest(&self, id: &AccountId) -> Option<Arc<AccountProfile>> {
        self.versions.get(id).and_then(|v| v.last().cloned())
    }

    /// Newest version whose `effective_at` is not after `at`.
    pub fn profile_at(&self, id: &AccountId, at: TimeMs) -> Option<Arc<AccountProfile>> {
        let versions = self.versions.get(id)?;
        let found = versions
            .iter()
            .filter(|p| p.effective_at <= at)
            .max_by_key(|p| (p.effective_at, p.alignment_version))
            .cloned();
        found
    }

    /// Build the next version without caching it. The first version is
    /// effective from the epoch unless told otherwise; later ones default to `now`.
    pub fn next_version(
        &self,
        id: &AccountId,
        persona_type: PersonaType,
        alignment: PoliticalAlignment,
        effective_at: Option<TimeMs>,
        now: TimeMs,
    ) -> AccountProfile {
        let (version, default_at) = match self.latest(id) {
            Some(last) => (last.alignment_version + 1, now),
            None => (1, TimeMs::new(0)),
        };
        AccountProfile {
            id: id.clone(),
            persona_type,
            alignment,
            alignment_version: version,
            effective_at: effective_at.unwrap_or(default_at),
        }
    }

    /// Cache a version, keeping the list ordered by version.
    pub fn insert(&self, profile: AccountProfile) -> Arc<AccountProfile> {
        let profile = Arc::new(profile);
        let mut versions = self.versions.entry(profile.id.clone()).or_default();
        match versions.binary_search_by_key(&profile.alignment_version, |p| p.alignment_version) {
            Ok(idx) => versions[idx] = Arc::clone(&profile),
            Err(idx) => versions.insert(idx, Arc::clone(&profile)),
        }
        profile
    }

    pub fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.versions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
