use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lib_scene::{ComponentKind, NativeNode, NativeScene, RendererError, SceneRenderer, SceneType};
use serde_json::Value;

pub struct HeadlessScene {
    id: u64,
    scene_type: SceneType,
}

impl NativeScene for HeadlessScene {
    fn native_id(&self) -> u64 {
        self.id
    }
}

pub struct HeadlessNode {
    id: u64,
    kind: String,
}

impl NativeNode for HeadlessNode {
    fn native_id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
struct RendererState {
    scenes: HashMap<u64, Arc<HeadlessScene>>,
    nodes: HashMap<u64, Arc<HeadlessNode>>,
    children: HashMap<u64, HashSet<u64>>,
    attached: Option<u64>,
    // Asset sources referenced by live nodes; dropped on memory pressure.
    cached_sources: HashSet<String>,
}

/// Renderer with no output device. It owns every object it creates until
/// teardown, which is what keeps the engine's weak references alive.
#[derive(Default)]
pub struct HeadlessRenderer {
    next_id: AtomicU64,
    state: Mutex<RendererState>,
}

fn source_of(kind: &ComponentKind) -> Option<&str> {
    match kind {
        ComponentKind::Image { source }
        | ComponentKind::Video { source, .. }
        | ComponentKind::Model { source }
        | ComponentKind::Sound { source, .. } => source.as_deref(),
        _ => None,
    }
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RendererState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
impl HeadlessRenderer {
    pub fn attached_scene(&self) -> Option<u64> {
        self.state().attached
    }

    pub fn scene_count(&self) -> usize {
        self.state().scenes.len()
    }

    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    pub fn cached_source_count(&self) -> usize {
        self.state().cached_sources.len()
    }

    pub fn child_count(&self, native_id: u64) -> usize {
        self.state().children.get(&native_id).map_or(0, HashSet::len)
    }
}

impl SceneRenderer for HeadlessRenderer {
    fn create_native_scene(
        &self,
        scene_type: SceneType,
        _props: &Value,
    ) -> Result<Arc<dyn NativeScene>, RendererError> {
        let scene = Arc::new(HeadlessScene {
            id: self.allocate(),
            scene_type,
        });
        self.state().scenes.insert(scene.id, scene.clone());
        log::debug!("Created {} native scene {}", scene_type, scene.id);
        Ok(scene)
    }

    fn attach_to_output(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        let mut state = self.state();
        let id = scene.native_id();
        if !state.scenes.contains_key(&id) {
            return Err(RendererError::Output(format!("scene {id} is not owned by this renderer")));
        }
        state.attached = Some(id);
        Ok(())
    }

    fn detach_from_output(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        let mut state = self.state();
        if state.attached == Some(scene.native_id()) {
            state.attached = None;
        }
        Ok(())
    }

    fn clear_subtree(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        self.state().children.remove(&scene.native_id());
        Ok(())
    }

    fn teardown(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        let mut state = self.state();
        let id = scene.native_id();
        if state.attached == Some(id) {
            state.attached = None;
        }
        if let Some(scene) = state.scenes.remove(&id) {
            log::debug!("Tore down {} native scene {}", scene.scene_type, id);
        }
        Ok(())
    }

    fn create_native_node(
        &self,
        kind: &ComponentKind,
        _props: &Value,
    ) -> Result<Arc<dyn NativeNode>, RendererError> {
        let node = Arc::new(HeadlessNode {
            id: self.allocate(),
            kind: kind.name().to_string(),
        });
        let mut state = self.state();
        if let Some(source) = source_of(kind) {
            state.cached_sources.insert(source.to_string());
        }
        state.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    fn attach_child(
        &self,
        parent: &Arc<dyn NativeNode>,
        child: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError> {
        self.state()
            .children
            .entry(parent.native_id())
            .or_default()
            .insert(child.native_id());
        Ok(())
    }

    fn detach_child(
        &self,
        parent: &Arc<dyn NativeNode>,
        child: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError> {
        if let Some(children) = self.state().children.get_mut(&parent.native_id()) {
            children.remove(&child.native_id());
        }
        Ok(())
    }

    fn teardown_node(&self, node: &Arc<dyn NativeNode>) -> Result<(), RendererError> {
        let mut state = self.state();
        let id = node.native_id();
        if let Some(node) = state.nodes.remove(&id) {
            log::trace!("Tore down {} node {}", node.kind, id);
        }
        state.children.remove(&id);
        Ok(())
    }

    fn attach_to_scene(
        &self,
        scene: &Arc<dyn NativeScene>,
        node: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError> {
        self.state()
            .children
            .entry(scene.native_id())
            .or_default()
            .insert(node.native_id());
        Ok(())
    }

    fn detach_from_scene(
        &self,
        scene: &Arc<dyn NativeScene>,
        node: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError> {
        if let Some(children) = self.state().children.get_mut(&scene.native_id()) {
            children.remove(&node.native_id());
        }
        Ok(())
    }

    fn release_cached_resources(&self) {
        let mut state = self.state();
        let released = state.cached_sources.len();
        state.cached_sources.clear();
        log::info!("Released {} cached asset sources", released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scene_ownership_and_idempotent_teardown() {
        let renderer = HeadlessRenderer::new();
        let scene = renderer.create_native_scene(SceneType::ArScene, &Value::Null).unwrap();
        let weak = Arc::downgrade(&scene);

        renderer.attach_to_output(&scene).unwrap();
        assert_eq!(renderer.attached_scene(), Some(scene.native_id()));

        renderer.teardown(&scene).unwrap();
        renderer.teardown(&scene).unwrap();
        assert_eq!(renderer.attached_scene(), None);
        assert_eq!(renderer.scene_count(), 0);

        drop(scene);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_attach_foreign_scene_fails() {
        let renderer = HeadlessRenderer::new();
        let other = HeadlessRenderer::new();
        let scene = other.create_native_scene(SceneType::Scene, &Value::Null).unwrap();
        other.teardown(&scene).unwrap();
        assert!(renderer.attach_to_output(&scene).is_err());
    }

    #[test]
    fn test_clear_subtree_drops_scene_roots() {
        let renderer = HeadlessRenderer::new();
        let scene = renderer.create_native_scene(SceneType::Scene, &Value::Null).unwrap();
        let kind = ComponentKind::from_tag("box", &Value::Null).unwrap();
        let a = renderer.create_native_node(&kind, &Value::Null).unwrap();
        let b = renderer.create_native_node(&kind, &Value::Null).unwrap();

        renderer.attach_to_scene(&scene, &a).unwrap();
        renderer.attach_to_scene(&scene, &b).unwrap();
        assert_eq!(renderer.child_count(scene.native_id()), 2);

        renderer.detach_from_scene(&scene, &b).unwrap();
        assert_eq!(renderer.child_count(scene.native_id()), 1);

        renderer.clear_subtree(&scene).unwrap();
        assert_eq!(renderer.child_count(scene.native_id()), 0);
    }

    #[test]
    fn test_release_cached_resources() {
        let renderer = HeadlessRenderer::new();
        let kind = ComponentKind::from_tag("image", &json!({"source": "a.png"})).unwrap();
        let node = renderer.create_native_node(&kind, &Value::Null).unwrap();
        assert_eq!(renderer.cached_source_count(), 1);

        renderer.release_cached_resources();
        assert_eq!(renderer.cached_source_count(), 0);

        renderer.teardown_node(&node).unwrap();
        assert_eq!(renderer.node_count(), 0);
    }
}
