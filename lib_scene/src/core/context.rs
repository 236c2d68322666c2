//! # Scene Context
//!
//! The explicitly constructed root object that wires the lifecycle manager,
//! component tree, pressure monitor and eviction policy together. The control
//! loop owns exactly one `SceneContext`; nothing in it is shared across
//! threads.
//!
//! Every mutating operation is followed by a throttled pressure check, and any
//! cleanup it calls for runs before the operation returns.

use std::sync::Arc;

use serde_json::Value;

use crate::configs::engine_config::EngineConfig;
use crate::core::async_dispatcher::AsyncResultDispatcher;
use crate::core::clock::Clock;
use crate::core::components::{ComponentRecord, ComponentTree};
use crate::core::error::Result;
use crate::core::eviction::EvictionPolicy;
use crate::core::lifecycle::{LifecycleListener, SceneLifecycleManager};
use crate::core::memory_monitor::{
    CleanupAction, MemoryPressureMonitor, MemoryProbe, PressureLevel, TrimLevel,
};
use crate::core::renderer::{SceneRenderer, SceneType};
use crate::core::report::{CleanupReport, MemoryReport};
use crate::core::scene_record::{SceneId, SceneState};

pub struct SceneContext {
    scenes: SceneLifecycleManager,
    components: ComponentTree,
    monitor: MemoryPressureMonitor,
    policy: EvictionPolicy,
    renderer: Arc<dyn SceneRenderer>,
    dispatcher: Option<AsyncResultDispatcher>,
}

impl SceneContext {
    pub fn new(
        renderer: Arc<dyn SceneRenderer>,
        probe: Box<dyn MemoryProbe>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            scenes: SceneLifecycleManager::new(renderer.clone(), clock.clone()),
            components: ComponentTree::new(renderer.clone()),
            monitor: MemoryPressureMonitor::new(probe, clock, config.monitor_settings()),
            policy: config.eviction_policy(),
            renderer,
            dispatcher: None,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn LifecycleListener>) {
        self.scenes.set_listener(listener);
    }

    /// Lets memory reports include the number of pending async tokens.
    pub fn attach_dispatcher(&mut self, dispatcher: AsyncResultDispatcher) {
        self.dispatcher = Some(dispatcher);
    }

    // --- Scenes ---

    pub fn create_scene(&mut self, id: &str, scene_type: SceneType, props: Value) -> Result<SceneId> {
        let result = self.scenes.create_scene(id, scene_type, props);
        self.check_pressure();
        result
    }

    pub fn update_scene(&mut self, id: &str, props: Value) -> Result<()> {
        let result = self.scenes.update_scene(id, props);
        self.check_pressure();
        result
    }

    pub fn activate_scene(&mut self, id: &str) -> Result<()> {
        let result = self.scenes.activate_scene(id);
        self.check_pressure();
        result
    }

    pub fn deactivate_scene(&mut self, id: &str) -> Result<()> {
        let result = self.scenes.deactivate_scene(id);
        self.check_pressure();
        result
    }

    /// Destroys the scene together with every component in its subtree.
    pub fn destroy_scene(&mut self, id: &str) -> Result<()> {
        self.components.delete_scene_subtree(id);
        let result = self.scenes.destroy_scene(id);
        self.check_pressure();
        result
    }

    pub fn scene_state(&self, id: &str) -> Option<SceneState> {
        self.scenes.scene_state(id)
    }

    pub fn active_scene_id(&self) -> Option<SceneId> {
        self.scenes.active_scene_id()
    }

    pub fn scenes(&self) -> &SceneLifecycleManager {
        &self.scenes
    }

    // --- Components ---

    pub fn create_node(&mut self, id: &str, tag: &str, props: Value) -> Result<()> {
        let result = self.components.create_node(id, tag, props);
        self.check_pressure();
        result
    }

    pub fn update_node(&mut self, id: &str, props: Value) -> Result<()> {
        let result = self.components.update_node(id, props);
        self.check_pressure();
        result
    }

    pub fn delete_node(&mut self, id: &str) -> Result<()> {
        if let Some(scene) = self.components.record(id).and_then(|r| r.scene.clone()) {
            let scene_native = self.scenes.native(&scene);
            let _ = self.components.detach_from_scene(&scene, scene_native.as_ref(), id);
        }
        let result = self.components.delete_node(id);
        self.check_pressure();
        result
    }

    /// Links `child` under `parent`, which is either a node or a scene id.
    /// Node ids take precedence when both exist.
    pub fn add_child(&mut self, parent: &str, child: &str) -> Result<()> {
        let result = self.link(parent, child);
        self.check_pressure();
        result
    }

    pub fn remove_child(&mut self, parent: &str, child: &str) -> Result<()> {
        let rooted_here = self
            .components
            .record(child)
            .is_some_and(|r| r.scene.as_deref() == Some(parent));
        let result = if rooted_here {
            let scene_native = self.scenes.native(parent);
            self.components
                .detach_from_scene(parent, scene_native.as_ref(), child)
        } else {
            self.components.remove_child(parent, child)
        };
        self.check_pressure();
        result
    }

    fn link(&mut self, parent: &str, child: &str) -> Result<()> {
        let previous_scene = self.components.record(child).and_then(|r| r.scene.clone());

        if self.components.record(parent).is_none() {
            if let Some(scene_native) = self.scenes.native(parent) {
                if let Some(previous) = previous_scene.filter(|s| s != parent) {
                    let previous_native = self.scenes.native(&previous);
                    self.components
                        .detach_from_scene(&previous, previous_native.as_ref(), child)?;
                }
                return self.components.attach_to_scene(parent, &scene_native, child);
            }
        }

        self.components.add_child(parent, child)?;
        if let Some(previous) = previous_scene {
            if let (Some(scene_native), Some(node)) =
                (self.scenes.native(&previous), self.components.native(child))
            {
                if let Err(err) = self.renderer.detach_from_scene(&scene_native, &node) {
                    log::warn!("Failed to detach '{}' from scene '{}': {}", child, previous, err);
                }
            }
        }
        Ok(())
    }

    pub fn bind_event(&mut self, id: &str, event: &str, callback: &str) -> Result<()> {
        self.components.bind_event(id, event, callback)
    }

    pub fn unbind_event(&mut self, id: &str, event: &str) -> Result<bool> {
        self.components.unbind_event(id, event)
    }

    pub fn node(&self, id: &str) -> Option<&ComponentRecord> {
        self.components.record(id)
    }

    /// Ids of the components in a scene's subtree.
    pub fn scene_nodes(&self, scene: &str) -> Vec<String> {
        self.components.scene_nodes(scene)
    }

    // --- Memory ---

    fn check_pressure(&mut self) {
        let action = self.monitor.check_pressure();
        self.apply(action);
    }

    /// Periodic monitor sample from the control loop's timer.
    pub fn on_tick(&mut self) -> Option<CleanupReport> {
        let action = self.monitor.tick();
        self.apply(action)
    }

    pub fn on_low_memory(&mut self) -> Option<CleanupReport> {
        let action = self.monitor.on_low_memory();
        self.apply(action)
    }

    /// Aggressive trim levels also drop every event binding. This part is
    /// not subject to the aggressive cooldown.
    pub fn on_trim_memory(&mut self, level: TrimLevel) -> Option<CleanupReport> {
        let action = self.monitor.on_trim_memory(level);
        let mut report = self.apply(action);
        if level.is_aggressive() {
            let cleared = self.components.clear_event_bindings();
            if let Some(report) = report.as_mut() {
                report.cleared_event_bindings = cleared;
            }
        }
        report
    }

    fn apply(&mut self, action: CleanupAction) -> Option<CleanupReport> {
        match action {
            CleanupAction::None => None,
            CleanupAction::Normal => Some(self.cleanup(false)),
            CleanupAction::Aggressive => Some(self.cleanup(true)),
        }
    }

    /// Caller-requested cleanup. Escalates to aggressive when the current
    /// sample is already critical.
    pub fn perform_memory_cleanup(&mut self, aggressive: bool) -> CleanupReport {
        let sample = self.monitor.sample_now();
        let critical = self.monitor.classify(&sample) == PressureLevel::Critical;
        let aggressive = aggressive || critical;
        if aggressive {
            self.monitor.note_aggressive_cleanup();
        }
        self.cleanup(aggressive)
    }

    fn cleanup(&mut self, aggressive: bool) -> CleanupReport {
        log::debug!("Performing memory cleanup (aggressive: {})", aggressive);
        let mut report = CleanupReport {
            aggressive,
            scenes_before: self.scenes.scene_count(),
            components_before: self.components.len(),
            ..Default::default()
        };

        report.stale_scenes = self.scenes.reap_stale();
        report.stale_components = self.components.reap_stale();
        for scene in &report.stale_scenes {
            let removed = self.components.delete_scene_subtree(scene);
            report.removed_components.extend(removed);
        }

        if aggressive {
            log::warn!("Performing aggressive memory cleanup due to high memory pressure");
            let active = self.scenes.active_scene_id();
            let now = self.scenes.now_ms();
            let victims = self
                .policy
                .select_victims(self.scenes.live_records(), active.as_deref(), now);
            for id in victims {
                log::debug!("Aggressively destroying old scene: {}", id);
                let removed = self.components.delete_scene_subtree(&id);
                report.removed_components.extend(removed);
                match self.scenes.destroy_scene(&id) {
                    Ok(()) => report.evicted_scenes.push(id),
                    Err(err) => log::error!("Eviction of '{}' failed: {}", id, err),
                }
            }
            let orphans = self.components.cleanup_orphans();
            report.removed_components.extend(orphans);
        }

        self.renderer.release_cached_resources();
        self.scenes.notify_memory_warning();

        report.scenes_after = self.scenes.scene_count();
        report.components_after = self.components.len();
        log::info!(
            "Memory cleanup completed: scenes {} -> {}, components {} -> {}",
            report.scenes_before,
            report.scenes_after,
            report.components_before,
            report.components_after
        );
        report
    }

    pub fn memory_stats(&self) -> MemoryReport {
        let sample = self.monitor.sample_now();
        let mut report = MemoryReport {
            total_scenes: self.scenes.scene_count(),
            live_scenes: self.scenes.live_scene_count(),
            scenes_by_state: self.scenes.counts_by_state(),
            active_scene_id: self.scenes.active_scene_id(),
            managed_components: self.components.len(),
            heap_used_mb: 0.0,
            heap_max_mb: 0.0,
            heap_usage_percent: 0.0,
            resident_mb: 0.0,
            os_low_memory: false,
            os_threshold_mb: 0.0,
            os_available_mb: 0.0,
            oldest_scene_age_secs: self.scenes.oldest_scene_age_ms() / 1_000,
            pressure_level: self.monitor.classify(&sample),
            warning_active: self.monitor.warning_active(),
            pending_async_tokens: self
                .dispatcher
                .as_ref()
                .map(AsyncResultDispatcher::pending_len)
                .unwrap_or(0),
        };
        report.fill_sample(&sample);
        report
    }

    /// Destroys every scene and component. Used on shutdown.
    pub fn teardown_all(&mut self) -> (usize, usize) {
        let scenes = self.scenes.destroy_all();
        let components = self.components.teardown_all();
        log::info!("Tore down {} scenes and {} components", scenes, components);
        (scenes, components)
    }
}
