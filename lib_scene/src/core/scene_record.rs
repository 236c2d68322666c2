//! Per-scene bookkeeping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::renderer::SceneType;

/// Scene ids are opaque strings chosen by the caller.
pub type SceneId = String;

/// Lifecycle states. `Destroyed` is terminal; a destroyed record is removed
/// from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SceneState {
    Created,
    Loading,
    Loaded,
    Active,
    Paused,
    Destroyed,
}

impl SceneState {
    /// States the eviction policy may destroy.
    pub fn is_evictable(&self) -> bool {
        matches!(self, SceneState::Loaded | SceneState::Paused)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, to: SceneState) -> bool {
        use SceneState::*;
        match (self, to) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Created, Loading) | (Created, Loaded) => true,
            (Loading, Loaded) => true,
            (Loaded, Active) | (Loaded, Paused) => true,
            (Active, Paused) => true,
            (Paused, Active) => true,
            _ => false,
        }
    }
}

/// Metadata kept for every scene. The native object itself lives in the
/// registry slot as a weak reference.
#[derive(Debug, Clone)]
pub struct SceneRecord {
    pub id: SceneId,
    pub scene_type: SceneType,
    pub state: SceneState,
    /// Monotonic creation time in milliseconds.
    pub created_at_ms: u64,
    /// Last property bag applied through create/update.
    pub props: Value,
}

impl SceneRecord {
    pub fn new(id: SceneId, scene_type: SceneType, created_at_ms: u64, props: Value) -> Self {
        Self {
            id,
            scene_type,
            state: SceneState::Created,
            created_at_ms,
            props,
        }
    }

    /// Age at `now_ms`, saturating at zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }
}
