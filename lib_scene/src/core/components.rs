//! # Component Tree
//!
//! Nodes inside scene subtrees. Every node is tracked by id with a weak
//! reference to the renderer's native node; parent/child links are stored as
//! ids, never as owning pointers, so a node can be detached without cascading
//! destruction and the tree cannot form reference cycles.
//!
//! A top-level node may be rooted directly in a scene. Every node below it
//! belongs to that scene and goes away with it.
//!
//! Component kinds form a closed set parsed from the front end's type tag.
//! Each variant carries only the properties the engine itself needs; the full
//! property bag is forwarded to the renderer untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::error::{Result, SceneError};
use crate::core::renderer::{NativeNode, NativeScene, SceneRenderer};
use crate::core::scene_record::SceneId;
use crate::core::weak_registry::WeakRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Directional,
    Omni,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    Fixed,
    Orbit,
}

/// Every node type the bridge can create.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    Node,
    FlexView,
    Box { width: f64, height: f64, length: f64 },
    Sphere { radius: f64 },
    Quad { width: f64, height: f64 },
    Polyline,
    Text { text: String },
    Image { source: Option<String> },
    Video { source: Option<String>, looping: bool },
    Model { source: Option<String> },
    SkyBox,
    Portal,
    ParticleEmitter,
    Camera(CameraKind),
    Light(LightKind),
    Sound { source: Option<String>, looping: bool, spatial: bool },
}

fn prop_f64(props: &Value, key: &str, default: f64) -> f64 {
    props.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn prop_bool(props: &Value, key: &str) -> bool {
    props.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn prop_string(props: &Value, key: &str) -> Option<String> {
    props.get(key).and_then(Value::as_str).map(str::to_string)
}

impl ComponentKind {
    /// Parses a type tag plus its props. Unknown tags are rejected.
    pub fn from_tag(tag: &str, props: &Value) -> Result<Self> {
        let kind = match tag {
            "node" => ComponentKind::Node,
            "flexView" => ComponentKind::FlexView,
            "box" => ComponentKind::Box {
                width: prop_f64(props, "width", 1.0),
                height: prop_f64(props, "height", 1.0),
                length: prop_f64(props, "length", 1.0),
            },
            "sphere" => ComponentKind::Sphere {
                radius: prop_f64(props, "radius", 1.0),
            },
            "quad" => ComponentKind::Quad {
                width: prop_f64(props, "width", 1.0),
                height: prop_f64(props, "height", 1.0),
            },
            "polyline" => ComponentKind::Polyline,
            "text" => ComponentKind::Text {
                text: prop_string(props, "text").unwrap_or_default(),
            },
            "image" | "360Image" | "animatedImage" => ComponentKind::Image {
                source: prop_string(props, "source"),
            },
            "video" | "360Video" => ComponentKind::Video {
                source: prop_string(props, "source"),
                looping: prop_bool(props, "loop"),
            },
            "3DObject" => ComponentKind::Model {
                source: prop_string(props, "source"),
            },
            "skyBox" => ComponentKind::SkyBox,
            "portal" | "portalScene" => ComponentKind::Portal,
            "particleEmitter" => ComponentKind::ParticleEmitter,
            "camera" => ComponentKind::Camera(CameraKind::Fixed),
            "orbitCamera" => ComponentKind::Camera(CameraKind::Orbit),
            "ambientLight" => ComponentKind::Light(LightKind::Ambient),
            "directionalLight" => ComponentKind::Light(LightKind::Directional),
            "omniLight" => ComponentKind::Light(LightKind::Omni),
            "spotLight" => ComponentKind::Light(LightKind::Spot),
            "sound" | "soundField" => ComponentKind::Sound {
                source: prop_string(props, "source"),
                looping: prop_bool(props, "loop"),
                spatial: false,
            },
            "spatialSound" => ComponentKind::Sound {
                source: prop_string(props, "source"),
                looping: prop_bool(props, "loop"),
                spatial: true,
            },
            other => return Err(SceneError::UnknownComponentType(other.to_string())),
        };
        Ok(kind)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::Node => "node",
            ComponentKind::FlexView => "flexView",
            ComponentKind::Box { .. } => "box",
            ComponentKind::Sphere { .. } => "sphere",
            ComponentKind::Quad { .. } => "quad",
            ComponentKind::Polyline => "polyline",
            ComponentKind::Text { .. } => "text",
            ComponentKind::Image { .. } => "image",
            ComponentKind::Video { .. } => "video",
            ComponentKind::Model { .. } => "3DObject",
            ComponentKind::SkyBox => "skyBox",
            ComponentKind::Portal => "portal",
            ComponentKind::ParticleEmitter => "particleEmitter",
            ComponentKind::Camera(_) => "camera",
            ComponentKind::Light(_) => "light",
            ComponentKind::Sound { .. } => "sound",
        }
    }

    /// Whether the kind may hold children.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ComponentKind::Node
                | ComponentKind::FlexView
                | ComponentKind::Portal
                | ComponentKind::Camera(_)
        )
    }
}

/// Bookkeeping for one node.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub id: String,
    pub kind: ComponentKind,
    pub parent: Option<String>,
    /// Scene this node is rooted in. Only set on top-level nodes.
    pub scene: Option<SceneId>,
    pub children: Vec<String>,
    pub props: Value,
    /// Event name -> front-end callback id.
    pub event_bindings: BTreeMap<String, String>,
}

impl ComponentRecord {
    fn is_orphan(&self) -> bool {
        self.parent.is_none() && self.scene.is_none() && self.children.is_empty()
    }
}

pub struct ComponentTree {
    registry: WeakRegistry<String, dyn NativeNode, ComponentRecord>,
    renderer: Arc<dyn SceneRenderer>,
}

impl ComponentTree {
    pub fn new(renderer: Arc<dyn SceneRenderer>) -> Self {
        Self {
            registry: WeakRegistry::new(),
            renderer,
        }
    }

    pub fn create_node(&mut self, id: &str, tag: &str, props: Value) -> Result<()> {
        let kind = ComponentKind::from_tag(tag, &props)?;
        if self.registry.is_live(id) {
            return Err(SceneError::DuplicateId(id.to_string()));
        }
        if self.registry.contains_key(id) {
            self.forget(id);
        }

        let native = self
            .renderer
            .create_native_node(&kind, &props)
            .map_err(|source| SceneError::CreateFailed {
                id: id.to_string(),
                source,
            })?;
        log::debug!("Component '{}' created as {}", id, kind.name());

        let record = ComponentRecord {
            id: id.to_string(),
            kind,
            parent: None,
            scene: None,
            children: Vec::new(),
            props,
            event_bindings: BTreeMap::new(),
        };
        self.registry.insert(id.to_string(), &native, record);
        Ok(())
    }

    pub fn update_node(&mut self, id: &str, props: Value) -> Result<()> {
        let native = self
            .registry
            .get(id)
            .ok_or_else(|| SceneError::NotFound(id.to_string()))?;
        self.renderer.update_native_node(&native, &props)?;
        if let Some(record) = self.registry.meta_mut(id) {
            record.props = props;
        }
        Ok(())
    }

    /// Detaches `id` from its parent, releases its event bindings, orphans its
    /// children, tears the native node down and forgets the id.
    pub fn delete_node(&mut self, id: &str) -> Result<()> {
        if !self.registry.contains_key(id) {
            return Err(SceneError::NotFound(id.to_string()));
        }

        let native = self.registry.get(id);
        self.unlink_parent(id, native.as_ref());
        self.unlink_children(id, native.as_ref());

        if let Some(record) = self.registry.meta_mut(id) {
            if !record.event_bindings.is_empty() {
                log::debug!(
                    "Releasing {} event bindings of '{}'",
                    record.event_bindings.len(),
                    id
                );
                record.event_bindings.clear();
            }
        }

        if let Some(native) = native {
            if let Err(err) = self.renderer.teardown_node(&native) {
                log::error!("Teardown of component '{}' failed: {}", id, err);
            }
        }
        self.registry.remove(id);
        Ok(())
    }

    pub fn add_child(&mut self, parent: &str, child: &str) -> Result<()> {
        let parent_native = self
            .registry
            .get(parent)
            .ok_or_else(|| SceneError::NotFound(parent.to_string()))?;
        let child_native = self
            .registry
            .get(child)
            .ok_or_else(|| SceneError::NotFound(child.to_string()))?;

        let hierarchy_error = |reason: &str| SceneError::InvalidHierarchy {
            parent: parent.to_string(),
            child: child.to_string(),
            reason: reason.to_string(),
        };
        if parent == child {
            return Err(hierarchy_error("a node cannot parent itself"));
        }
        if self.is_ancestor(child, parent) {
            return Err(hierarchy_error("would create a cycle"));
        }
        if let Some(record) = self.registry.meta(parent) {
            if !record.kind.is_container() {
                return Err(hierarchy_error("parent kind cannot hold children"));
            }
        }

        let current_parent = self.registry.meta(child).and_then(|r| r.parent.clone());
        if current_parent.as_deref() == Some(parent) {
            return Ok(());
        }
        if current_parent.is_some() {
            self.unlink_parent(child, Some(&child_native));
        }

        self.renderer.attach_child(&parent_native, &child_native)?;
        if let Some(record) = self.registry.meta_mut(parent) {
            record.children.push(child.to_string());
        }
        if let Some(record) = self.registry.meta_mut(child) {
            if let Some(scene) = record.scene.take() {
                log::debug!("Component '{}' moved from scene '{}' to '{}'", child, scene, parent);
            }
            record.parent = Some(parent.to_string());
        }
        Ok(())
    }

    /// Roots `child` directly in `scene`, detaching it from any parent node.
    /// The caller detaches it from a previous scene first.
    pub fn attach_to_scene(
        &mut self,
        scene: &str,
        scene_native: &Arc<dyn NativeScene>,
        child: &str,
    ) -> Result<()> {
        let child_native = self
            .registry
            .get(child)
            .ok_or_else(|| SceneError::NotFound(child.to_string()))?;
        if self.registry.meta(child).and_then(|r| r.scene.as_deref()) == Some(scene) {
            return Ok(());
        }
        self.unlink_parent(child, Some(&child_native));

        self.renderer.attach_to_scene(scene_native, &child_native)?;
        if let Some(record) = self.registry.meta_mut(child) {
            record.scene = Some(scene.to_string());
        }
        log::debug!("Component '{}' attached to scene '{}'", child, scene);
        Ok(())
    }

    /// Unroots `child` from `scene`. Without a native scene only the
    /// bookkeeping is cleared.
    pub fn detach_from_scene(
        &mut self,
        scene: &str,
        scene_native: Option<&Arc<dyn NativeScene>>,
        child: &str,
    ) -> Result<()> {
        let rooted = self
            .registry
            .meta(child)
            .ok_or_else(|| SceneError::NotFound(child.to_string()))?
            .scene
            .as_deref()
            == Some(scene);
        if !rooted {
            return Err(SceneError::InvalidHierarchy {
                parent: scene.to_string(),
                child: child.to_string(),
                reason: "not attached to this scene".to_string(),
            });
        }
        if let (Some(scene_native), Some(child_native)) = (scene_native, self.registry.get(child)) {
            if let Err(err) = self.renderer.detach_from_scene(scene_native, &child_native) {
                log::warn!("Failed to detach '{}' from scene '{}': {}", child, scene, err);
            }
        }
        if let Some(record) = self.registry.meta_mut(child) {
            record.scene = None;
        }
        Ok(())
    }

    /// Scene the node belongs to, found through its top-level ancestor.
    pub fn scene_of(&self, id: &str) -> Option<SceneId> {
        let mut cursor = id.to_string();
        loop {
            let record = self.registry.meta(cursor.as_str())?;
            match &record.parent {
                Some(parent) => cursor = parent.clone(),
                None => return record.scene.clone(),
            }
        }
    }

    /// Ids of every node in `scene`'s subtree.
    pub fn scene_nodes(&self, scene: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .keys()
            .filter(|id| self.scene_of(id.as_str()).as_deref() == Some(scene))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Deletes `scene`'s whole subtree, deepest nodes first. The scene's own
    /// native subtree is left for the renderer to clear.
    pub fn delete_scene_subtree(&mut self, scene: &str) -> Vec<String> {
        let mut ids = self.scene_nodes(scene);
        ids.sort_by_key(|id| std::cmp::Reverse(self.depth(id)));
        for id in &ids {
            if let Some(record) = self.registry.meta_mut(id.as_str()) {
                record.scene = None;
            }
            let _ = self.delete_node(id);
        }
        if !ids.is_empty() {
            log::debug!("Deleted {} components of scene '{}'", ids.len(), scene);
        }
        ids
    }

    pub fn remove_child(&mut self, parent: &str, child: &str) -> Result<()> {
        if !self.registry.contains_key(parent) {
            return Err(SceneError::NotFound(parent.to_string()));
        }
        let linked = self
            .registry
            .meta(child)
            .ok_or_else(|| SceneError::NotFound(child.to_string()))?
            .parent
            .as_deref()
            == Some(parent);
        if !linked {
            return Err(SceneError::InvalidHierarchy {
                parent: parent.to_string(),
                child: child.to_string(),
                reason: "not a child of this parent".to_string(),
            });
        }
        let child_native = self.registry.get(child);
        self.unlink_parent(child, child_native.as_ref());
        Ok(())
    }

    pub fn bind_event(&mut self, id: &str, event: &str, callback: &str) -> Result<()> {
        if !self.registry.is_live(id) {
            return Err(SceneError::NotFound(id.to_string()));
        }
        if let Some(record) = self.registry.meta_mut(id) {
            record
                .event_bindings
                .insert(event.to_string(), callback.to_string());
        }
        Ok(())
    }

    /// Returns whether a binding was removed.
    pub fn unbind_event(&mut self, id: &str, event: &str) -> Result<bool> {
        let record = self
            .registry
            .meta_mut(id)
            .ok_or_else(|| SceneError::NotFound(id.to_string()))?;
        Ok(record.event_bindings.remove(event).is_some())
    }

    /// Drops every event binding in the tree and returns how many there were.
    /// Nodes stay in place; callers re-bind once memory recovers.
    pub fn clear_event_bindings(&mut self) -> usize {
        let mut cleared = 0;
        for record in self.registry.metas_mut() {
            cleared += record.event_bindings.len();
            record.event_bindings.clear();
        }
        if cleared > 0 {
            log::info!("Cleared {} event bindings", cleared);
        }
        cleared
    }

    /// Removes nodes whose native object is gone and repairs the links that
    /// pointed at them.
    pub fn reap_stale(&mut self) -> Vec<String> {
        let reaped = self.registry.reap_stale();
        for (id, record) in &reaped {
            if let Some(parent) = record.parent.as_deref() {
                if let Some(parent_record) = self.registry.meta_mut(parent) {
                    parent_record.children.retain(|c| c != id);
                }
            }
            for child in &record.children {
                if let Some(child_record) = self.registry.meta_mut(child.as_str()) {
                    child_record.parent = None;
                }
            }
            log::debug!("Cleaning up stale component reference: {}", id);
        }
        reaped.into_iter().map(|(id, _)| id).collect()
    }

    /// Deletes every node with neither a parent nor children.
    pub fn cleanup_orphans(&mut self) -> Vec<String> {
        let orphans: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, record, _)| record.is_orphan())
            .map(|(id, _, _)| id.clone())
            .collect();
        for id in &orphans {
            let _ = self.delete_node(id);
        }
        if !orphans.is_empty() {
            log::debug!("Cleaned up {} unused components", orphans.len());
        }
        orphans
    }

    pub fn native(&self, id: &str) -> Option<Arc<dyn NativeNode>> {
        self.registry.get(id)
    }

    pub fn record(&self, id: &str) -> Option<&ComponentRecord> {
        self.registry.get_live(id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Deletes every node, leaves first.
    pub fn teardown_all(&mut self) -> usize {
        let count = self.registry.len();
        while let Some(id) = self.next_leaf() {
            let _ = self.delete_node(&id);
        }
        count
    }

    fn next_leaf(&self) -> Option<String> {
        let mut any = None;
        for (id, record, _) in self.registry.iter() {
            if record.children.is_empty() {
                return Some(id.clone());
            }
            any.get_or_insert_with(|| id.clone());
        }
        any
    }

    fn depth(&self, id: &str) -> usize {
        let mut depth = 0;
        let mut cursor = self.registry.meta(id).and_then(|r| r.parent.clone());
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.registry.meta(parent.as_str()).and_then(|r| r.parent.clone());
        }
        depth
    }

    fn is_ancestor(&self, candidate: &str, of: &str) -> bool {
        let mut cursor = self.registry.meta(of).and_then(|r| r.parent.clone());
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.registry.meta(id.as_str()).and_then(|r| r.parent.clone());
        }
        false
    }

    fn unlink_parent(&mut self, id: &str, native: Option<&Arc<dyn NativeNode>>) {
        let Some(parent) = self.registry.meta_mut(id).and_then(|r| r.parent.take()) else {
            return;
        };
        if let (Some(parent_native), Some(native)) = (self.registry.get(parent.as_str()), native) {
            if let Err(err) = self.renderer.detach_child(&parent_native, native) {
                log::warn!("Failed to detach '{}' from '{}': {}", id, parent, err);
            }
        }
        if let Some(parent_record) = self.registry.meta_mut(parent.as_str()) {
            parent_record.children.retain(|c| c != id);
        }
    }

    fn unlink_children(&mut self, id: &str, native: Option<&Arc<dyn NativeNode>>) {
        let children = match self.registry.meta_mut(id) {
            Some(record) => std::mem::take(&mut record.children),
            None => return,
        };
        for child in children {
            if let (Some(native), Some(child_native)) = (native, self.registry.get(child.as_str())) {
                if let Err(err) = self.renderer.detach_child(native, &child_native) {
                    log::warn!("Failed to detach '{}' from '{}': {}", child, id, err);
                }
            }
            if let Some(child_record) = self.registry.meta_mut(child.as_str()) {
                child_record.parent = None;
            }
        }
    }

    fn forget(&mut self, id: &str) {
        self.unlink_parent(id, None);
        self.unlink_children(id, None);
        self.registry.remove(id);
    }
}
