#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lib_scene::{
    ComponentKind, MemoryProbe, MemorySample, NativeNode, NativeScene, RendererError, SceneRenderer,
    SceneType,
};
use serde_json::Value;

pub struct Handle(pub u64);

impl NativeScene for Handle {
    fn native_id(&self) -> u64 {
        self.0
    }
}

impl NativeNode for Handle {
    fn native_id(&self) -> u64 {
        self.0
    }
}

/// Renderer that owns its objects in maps and records every call.
#[derive(Default)]
pub struct MockRenderer {
    next: Mutex<u64>,
    scenes: Mutex<HashMap<u64, Arc<dyn NativeScene>>>,
    nodes: Mutex<HashMap<u64, Arc<dyn NativeNode>>>,
    calls: Mutex<Vec<String>>,
}

impl MockRenderer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Drops every scene the renderer still owns.
    pub fn drop_scenes(&self) {
        self.scenes.lock().unwrap().clear();
    }

    fn next_id(&self) -> u64 {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        *next
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SceneRenderer for MockRenderer {
    fn create_native_scene(&self, _: SceneType, _: &Value) -> Result<Arc<dyn NativeScene>, RendererError> {
        let id = self.next_id();
        let scene: Arc<dyn NativeScene> = Arc::new(Handle(id));
        self.scenes.lock().unwrap().insert(id, scene.clone());
        Ok(scene)
    }

    fn attach_to_output(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        self.log(format!("attach {}", scene.native_id()));
        Ok(())
    }

    fn detach_from_output(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        self.log(format!("detach {}", scene.native_id()));
        Ok(())
    }

    fn teardown(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        self.log(format!("teardown {}", scene.native_id()));
        self.scenes.lock().unwrap().remove(&scene.native_id());
        Ok(())
    }

    fn create_native_node(&self, _: &ComponentKind, _: &Value) -> Result<Arc<dyn NativeNode>, RendererError> {
        let id = self.next_id();
        let node: Arc<dyn NativeNode> = Arc::new(Handle(id));
        self.nodes.lock().unwrap().insert(id, node.clone());
        Ok(node)
    }

    fn attach_child(&self, _: &Arc<dyn NativeNode>, _: &Arc<dyn NativeNode>) -> Result<(), RendererError> {
        Ok(())
    }

    fn detach_child(&self, _: &Arc<dyn NativeNode>, _: &Arc<dyn NativeNode>) -> Result<(), RendererError> {
        Ok(())
    }

    fn teardown_node(&self, node: &Arc<dyn NativeNode>) -> Result<(), RendererError> {
        self.log(format!("teardown_node {}", node.native_id()));
        self.nodes.lock().unwrap().remove(&node.native_id());
        Ok(())
    }

    fn attach_to_scene(&self, scene: &Arc<dyn NativeScene>, node: &Arc<dyn NativeNode>) -> Result<(), RendererError> {
        self.log(format!("scene_attach {}<-{}", scene.native_id(), node.native_id()));
        Ok(())
    }

    fn detach_from_scene(&self, scene: &Arc<dyn NativeScene>, node: &Arc<dyn NativeNode>) -> Result<(), RendererError> {
        self.log(format!("scene_detach {}<-{}", scene.native_id(), node.native_id()));
        Ok(())
    }

    fn release_cached_resources(&self) {
        self.log("release_cached_resources".to_string());
    }
}

/// Probe whose heap usage (out of 100) tests can change at will.
#[derive(Clone, Default)]
pub struct DialProbe {
    used: Arc<Mutex<u64>>,
}

impl DialProbe {
    pub fn set(&self, used: u64) {
        *self.used.lock().unwrap() = used;
    }
}

impl MemoryProbe for DialProbe {
    fn sample(&self) -> MemorySample {
        MemorySample {
            heap_used: *self.used.lock().unwrap(),
            heap_max: 100,
            ..Default::default()
        }
    }
}
