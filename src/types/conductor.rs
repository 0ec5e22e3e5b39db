//! Conductor Membership Types
//!
//! Heartbeat records and the derived online set consumed by the hash ring.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Liveness record a conductor refreshes on every heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorRecord {
    pub id: String,
    pub conductor_group: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl ConductorRecord {
    pub fn new(id: impl Into<String>, conductor_group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            conductor_group: conductor_group.into(),
            last_heartbeat: Utc::now(),
        }
    }

    pub fn is_online(&self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> bool {
        let timeout = ChronoDuration::from_std(heartbeat_timeout).unwrap_or(ChronoDuration::MAX);
        now.signed_duration_since(self.last_heartbeat) <= timeout
    }
}

/// Immutable snapshot of online conductors, keyed by conductor group.
///
/// Built once per cycle and passed into the engine, so tests can hand in
/// synthetic membership without a heartbeat table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineConductors {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl OnlineConductors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ConductorRecord>,
        now: DateTime<Utc>,
        heartbeat_timeout: Duration,
    ) -> Self {
        let mut online = Self::new();
        for record in records {
            if record.is_online(now, heartbeat_timeout) {
                online.insert(&record.conductor_group, &record.id);
            }
        }
        online
    }

    pub fn with_group<I, S>(mut self, group: &str, conductors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.groups.entry(group.to_string()).or_default();
        entry.extend(conductors.into_iter().map(Into::into));
        self
    }

    pub fn insert(&mut self, group: &str, conductor_id: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(conductor_id.to_string());
    }

    pub fn group(&self, group: &str) -> Option<&BTreeSet<String>> {
        self.groups.get(group).filter(|members| !members.is_empty())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.groups.iter()
    }

    pub fn contains(&self, group: &str, conductor_id: &str) -> bool {
        self.groups
            .get(group)
            .map(|members| members.contains(conductor_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
