//! Serializable snapshots handed to callers: memory statistics and the outcome
//! of a cleanup pass.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::memory_monitor::{MemorySample, PressureLevel};
use crate::core::scene_record::SceneId;

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    pub total_scenes: usize,
    pub live_scenes: usize,
    pub scenes_by_state: BTreeMap<String, usize>,
    pub active_scene_id: Option<SceneId>,
    pub managed_components: usize,
    pub heap_used_mb: f64,
    pub heap_max_mb: f64,
    pub heap_usage_percent: f64,
    pub resident_mb: f64,
    pub os_low_memory: bool,
    pub os_threshold_mb: f64,
    pub os_available_mb: f64,
    pub oldest_scene_age_secs: u64,
    pub pressure_level: PressureLevel,
    pub warning_active: bool,
    pub pending_async_tokens: usize,
}

impl MemoryReport {
    pub(crate) fn fill_sample(&mut self, sample: &MemorySample) {
        self.heap_used_mb = sample.heap_used_mb();
        self.heap_max_mb = sample.heap_max_mb();
        self.heap_usage_percent = sample.heap_used_ratio() * 100.0;
        self.resident_mb = sample.resident as f64 / MB;
        self.os_low_memory = sample.os_low_memory;
        self.os_threshold_mb = sample.os_threshold as f64 / MB;
        self.os_available_mb = sample.os_available as f64 / MB;
    }
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub aggressive: bool,
    pub stale_scenes: Vec<SceneId>,
    pub stale_components: Vec<String>,
    pub evicted_scenes: Vec<SceneId>,
    pub removed_components: Vec<String>,
    pub cleared_event_bindings: usize,
    pub scenes_before: usize,
    pub scenes_after: usize,
    pub components_before: usize,
    pub components_after: usize,
}

impl CleanupReport {
    pub fn removed_scene_count(&self) -> usize {
        self.stale_scenes.len() + self.evicted_scenes.len()
    }
}
