//! # Renderer Collaborator
//!
//! The engine never draws anything. It asks a [`SceneRenderer`] to build,
//! attach, detach and tear down native objects, and it keeps only weak
//! references to what the renderer hands back. The renderer owns the strong
//! `Arc`s; when it drops one, the matching registry entry goes stale.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::components::ComponentKind;
use crate::core::error::{RendererError, SceneError};

/// Declared type of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SceneType {
    /// A plain 3D/VR scene.
    Scene,
    /// An AR scene.
    ArScene,
}

impl SceneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneType::Scene => "scene",
            SceneType::ArScene => "arScene",
        }
    }
}

impl fmt::Display for SceneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SceneType {
    type Err = SceneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scene" => Ok(SceneType::Scene),
            "arScene" => Ok(SceneType::ArScene),
            other => Err(SceneError::UnknownSceneType(other.to_string())),
        }
    }
}

/// A renderer-owned scene object.
pub trait NativeScene: Send + Sync {
    /// Renderer-assigned identity, used only for logging.
    fn native_id(&self) -> u64;
}

/// A renderer-owned node inside a scene subtree.
pub trait NativeNode: Send + Sync {
    fn native_id(&self) -> u64;
}

/// Operations the engine consumes from the rendering subsystem.
///
/// Every method may fail; the engine decides per call site whether the
/// failure is reported to the caller or logged and absorbed.
pub trait SceneRenderer: Send + Sync {
    /// Builds a native scene. The renderer keeps the strong reference.
    fn create_native_scene(
        &self,
        scene_type: SceneType,
        props: &Value,
    ) -> Result<Arc<dyn NativeScene>, RendererError>;

    /// Applies an opaque property bag to a live scene.
    fn update_native_scene(
        &self,
        _scene: &Arc<dyn NativeScene>,
        _props: &Value,
    ) -> Result<(), RendererError> {
        Ok(())
    }

    fn attach_to_output(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError>;

    fn detach_from_output(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError>;

    /// Removes every child from the scene's subtree.
    fn clear_subtree(&self, _scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        Ok(())
    }

    /// Detaches the scene from whatever parent view holds it.
    fn detach_from_parent(&self, _scene: &Arc<dyn NativeScene>) -> Result<(), RendererError> {
        Ok(())
    }

    /// Final teardown hook. Must tolerate an already torn-down handle.
    fn teardown(&self, scene: &Arc<dyn NativeScene>) -> Result<(), RendererError>;

    fn create_native_node(
        &self,
        kind: &ComponentKind,
        props: &Value,
    ) -> Result<Arc<dyn NativeNode>, RendererError>;

    fn update_native_node(
        &self,
        _node: &Arc<dyn NativeNode>,
        _props: &Value,
    ) -> Result<(), RendererError> {
        Ok(())
    }

    fn attach_child(
        &self,
        parent: &Arc<dyn NativeNode>,
        child: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError>;

    fn detach_child(
        &self,
        parent: &Arc<dyn NativeNode>,
        child: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError>;

    fn teardown_node(&self, node: &Arc<dyn NativeNode>) -> Result<(), RendererError>;

    /// Places a top-level node directly under the scene root.
    fn attach_to_scene(
        &self,
        _scene: &Arc<dyn NativeScene>,
        _node: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError> {
        Ok(())
    }

    fn detach_from_scene(
        &self,
        _scene: &Arc<dyn NativeScene>,
        _node: &Arc<dyn NativeNode>,
    ) -> Result<(), RendererError> {
        Ok(())
    }

    /// Hint that cached resources (materials, textures) may be dropped.
    fn release_cached_resources(&self) {}
}
