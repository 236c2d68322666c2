//! # Scene Lifecycle Manager
//!
//! Owns the scene registry and drives every scene through
//! `Created -> Loading -> Loaded -> Active <-> Paused -> Destroyed`.
//!
//! ## Invariants
//!
//! - At most one scene is `Active`, and it is always the tracked current
//!   scene. Activating a scene pauses the previous one first.
//! - Operations on an unknown or dead id return [`SceneError::NotFound`] and
//!   leave the registry as it was.
//! - A destroyed scene's record is always removed, even if the renderer fails
//!   while tearing the native object down. The teardown hook runs at most once
//!   per record because the record is gone afterwards.
//!
//! The manager is single-writer: it lives on the control loop and is never
//! shared across threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::clock::Clock;
use crate::core::error::{Result, SceneError};
use crate::core::renderer::{NativeScene, SceneRenderer, SceneType};
use crate::core::scene_record::{SceneId, SceneRecord, SceneState};
use crate::core::weak_registry::WeakRegistry;

/// Observer for scene lifecycle events. Every hook defaults to a no-op.
pub trait LifecycleListener: Send {
    fn on_scene_created(&mut self, _id: &str, _scene_type: SceneType) {}
    fn on_scene_activated(&mut self, _id: &str) {}
    fn on_scene_deactivated(&mut self, _id: &str) {}
    fn on_scene_destroyed(&mut self, _id: &str) {}
    fn on_memory_warning(&mut self) {}
}

type SceneRegistry = WeakRegistry<SceneId, dyn NativeScene, SceneRecord>;

pub struct SceneLifecycleManager {
    registry: SceneRegistry,
    current: Option<SceneId>,
    renderer: Arc<dyn SceneRenderer>,
    clock: Arc<dyn Clock>,
    listener: Option<Box<dyn LifecycleListener>>,
}

impl SceneLifecycleManager {
    pub fn new(renderer: Arc<dyn SceneRenderer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: WeakRegistry::new(),
            current: None,
            renderer,
            clock,
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn LifecycleListener>) {
        self.listener = Some(listener);
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Creates a scene and advances it to `Loaded`.
    ///
    /// Creating an id that already has a live record returns that id without
    /// touching the renderer.
    pub fn create_scene(&mut self, id: &str, scene_type: SceneType, props: Value) -> Result<SceneId> {
        if self.registry.is_live(id) {
            log::warn!("Scene '{}' already exists, returning existing scene", id);
            return Ok(id.to_string());
        }
        self.insert_created(id, scene_type, props)?;
        self.transition(id, SceneState::Loaded);
        log::debug!("Scene '{}' created as {}", id, scene_type);
        Ok(id.to_string())
    }

    /// Creates a scene but leaves it in `Created`, for renderers that finish
    /// loading asynchronously. Follow with [`Self::mark_loading`] and
    /// [`Self::mark_loaded`].
    pub fn create_scene_pending(
        &mut self,
        id: &str,
        scene_type: SceneType,
        props: Value,
    ) -> Result<SceneId> {
        if self.registry.is_live(id) {
            log::warn!("Scene '{}' already exists, returning existing scene", id);
            return Ok(id.to_string());
        }
        self.insert_created(id, scene_type, props)?;
        Ok(id.to_string())
    }

    pub fn mark_loading(&mut self, id: &str) -> Result<()> {
        self.checked_transition(id, SceneState::Loading)
    }

    pub fn mark_loaded(&mut self, id: &str) -> Result<()> {
        self.checked_transition(id, SceneState::Loaded)
    }

    fn insert_created(&mut self, id: &str, scene_type: SceneType, props: Value) -> Result<()> {
        if self.registry.contains_key(id) {
            log::debug!("Dropping stale registry entry for '{}' before re-create", id);
            self.forget(id);
        }

        let native = self
            .renderer
            .create_native_scene(scene_type, &props)
            .map_err(|source| SceneError::CreateFailed {
                id: id.to_string(),
                source,
            })?;

        let record = SceneRecord::new(id.to_string(), scene_type, self.clock.now_ms(), props);
        self.registry.insert(id.to_string(), &native, record);

        if let Some(listener) = self.listener.as_mut() {
            listener.on_scene_created(id, scene_type);
        }
        Ok(())
    }

    /// Applies a new property bag to a live scene.
    pub fn update_scene(&mut self, id: &str, props: Value) -> Result<()> {
        let native = self
            .registry
            .get(id)
            .ok_or_else(|| SceneError::NotFound(id.to_string()))?;
        self.renderer.update_native_scene(&native, &props)?;
        if let Some(record) = self.registry.meta_mut(id) {
            record.props = props;
        }
        Ok(())
    }

    /// Makes `id` the single active scene, pausing the previous one.
    pub fn activate_scene(&mut self, id: &str) -> Result<()> {
        let (native, state) = match self.registry.get_live(id) {
            Some((native, record)) => (native, record.state),
            None => {
                log::error!("Cannot activate scene: scene not found - {}", id);
                return Err(SceneError::NotFound(id.to_string()));
            }
        };

        if state == SceneState::Active && self.current.as_deref() == Some(id) {
            return Ok(());
        }
        if !state.can_transition_to(SceneState::Active) {
            return Err(SceneError::InvalidTransition {
                id: id.to_string(),
                from: state,
                to: SceneState::Active,
            });
        }

        if let Some(previous) = self.current.clone() {
            if previous != id {
                self.pause_current(&previous);
            }
        }

        self.renderer.attach_to_output(&native)?;
        self.transition(id, SceneState::Active);
        self.current = Some(id.to_string());

        if let Some(listener) = self.listener.as_mut() {
            listener.on_scene_activated(id);
        }
        log::debug!("Scene '{}' activated", id);
        Ok(())
    }

    /// Pauses `id`. Valid from `Active` or `Loaded`; a paused scene is left
    /// alone.
    pub fn deactivate_scene(&mut self, id: &str) -> Result<()> {
        let state = match self.registry.get_live(id) {
            Some((_, record)) => record.state,
            None => {
                log::warn!("Scene not found for deactivation: {}", id);
                return Err(SceneError::NotFound(id.to_string()));
            }
        };

        match state {
            SceneState::Paused => Ok(()),
            SceneState::Active | SceneState::Loaded => {
                if self.current.as_deref() == Some(id) {
                    self.pause_current(id);
                } else {
                    self.transition(id, SceneState::Paused);
                    if let Some(listener) = self.listener.as_mut() {
                        listener.on_scene_deactivated(id);
                    }
                }
                Ok(())
            }
            from => Err(SceneError::InvalidTransition {
                id: id.to_string(),
                from,
                to: SceneState::Paused,
            }),
        }
    }

    /// Destroys `id`: deactivates it if current, releases the native object
    /// and removes the record.
    ///
    /// A record whose referent is already dead is purged and reported as
    /// `NotFound`. Renderer failures during teardown are logged; the record is
    /// removed regardless.
    pub fn destroy_scene(&mut self, id: &str) -> Result<()> {
        if !self.registry.contains_key(id) {
            log::warn!("Scene not found for destruction: {}", id);
            return Err(SceneError::NotFound(id.to_string()));
        }

        if self.current.as_deref() == Some(id) {
            self.pause_current(id);
        }

        let Some(native) = self.registry.get(id) else {
            log::debug!("Scene '{}' was already released by the renderer", id);
            self.forget(id);
            return Err(SceneError::NotFound(id.to_string()));
        };

        if let Err(err) = self.release_native(id, &native) {
            log::error!("{}", err);
        }
        drop(native);

        if let Some(record) = self.registry.meta_mut(id) {
            record.state = SceneState::Destroyed;
        }
        self.registry.remove(id);

        if let Some(listener) = self.listener.as_mut() {
            listener.on_scene_destroyed(id);
        }
        log::debug!("Scene '{}' destroyed", id);
        Ok(())
    }

    /// Runs every teardown step even if an earlier one fails; reports the
    /// first failure.
    fn release_native(&self, id: &str, native: &Arc<dyn NativeScene>) -> Result<()> {
        let steps = [
            self.renderer.clear_subtree(native),
            self.renderer.detach_from_parent(native),
            self.renderer.teardown(native),
        ];
        match steps.into_iter().find_map(|step| step.err()) {
            Some(err) => Err(SceneError::TeardownFailed {
                id: id.to_string(),
                reason: err.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Detaches the current scene from the output and marks it `Paused`.
    fn pause_current(&mut self, id: &str) {
        if let Some(native) = self.registry.get(id) {
            if let Err(err) = self.renderer.detach_from_output(&native) {
                log::error!("Failed to detach scene '{}' from output: {}", id, err);
            }
        }
        if let Some(record) = self.registry.meta_mut(id) {
            record.state = SceneState::Paused;
        }
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.on_scene_deactivated(id);
        }
    }

    fn checked_transition(&mut self, id: &str, to: SceneState) -> Result<()> {
        let from = match self.registry.get_live(id) {
            Some((_, record)) => record.state,
            None => return Err(SceneError::NotFound(id.to_string())),
        };
        if !from.can_transition_to(to) {
            return Err(SceneError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        self.transition(id, to);
        Ok(())
    }

    fn transition(&mut self, id: &str, to: SceneState) {
        if let Some(record) = self.registry.meta_mut(id) {
            log::trace!("Scene '{}': {:?} -> {:?}", id, record.state, to);
            record.state = to;
        }
    }

    fn forget(&mut self, id: &str) {
        self.registry.remove(id);
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
    }

    /// Removes records whose native object the renderer already dropped.
    pub fn reap_stale(&mut self) -> Vec<SceneId> {
        let reaped: Vec<SceneId> = self
            .registry
            .reap_stale()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if let Some(current) = self.current.as_deref() {
            if reaped.iter().any(|id| id == current) {
                self.current = None;
            }
        }
        for id in &reaped {
            log::debug!("Cleaning up stale scene reference: {}", id);
        }
        reaped
    }

    /// Native handle of a live scene.
    pub fn native(&self, id: &str) -> Option<Arc<dyn NativeScene>> {
        self.registry.get(id)
    }

    /// State of a live scene.
    pub fn scene_state(&self, id: &str) -> Option<SceneState> {
        self.registry.get_live(id).map(|(_, record)| record.state)
    }

    /// Id of the current scene, if it is still alive.
    pub fn active_scene_id(&self) -> Option<SceneId> {
        self.current
            .as_deref()
            .filter(|id| self.registry.is_live(*id))
            .map(str::to_string)
    }

    /// Records whose native object is still alive.
    pub fn live_records(&self) -> impl Iterator<Item = &SceneRecord> {
        self.registry
            .iter()
            .filter(|(_, _, live)| *live)
            .map(|(_, record, _)| record)
    }

    /// Number of records, including stale ones awaiting a reap.
    pub fn scene_count(&self) -> usize {
        self.registry.len()
    }

    pub fn live_scene_count(&self) -> usize {
        self.registry.live_len()
    }

    pub fn counts_by_state(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.live_records() {
            *counts.entry(format!("{:?}", record.state)).or_insert(0) += 1;
        }
        counts
    }

    /// Age of the oldest live scene.
    pub fn oldest_scene_age_ms(&self) -> u64 {
        let now = self.clock.now_ms();
        self.live_records()
            .map(|record| record.age_ms(now))
            .max()
            .unwrap_or(0)
    }

    /// All ids currently tracked, live or stale.
    pub fn scene_ids(&self) -> Vec<SceneId> {
        self.registry.keys().cloned().collect()
    }

    pub fn notify_memory_warning(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_memory_warning();
        }
    }

    /// Destroys every scene. Returns how many records were removed.
    pub fn destroy_all(&mut self) -> usize {
        let ids = self.scene_ids();
        let count = ids.len();
        for id in ids {
            // Stale entries report NotFound but are purged all the same.
            let _ = self.destroy_scene(&id);
        }
        self.current = None;
        count
    }
}
