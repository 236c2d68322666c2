use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::projection::Viewport;

/// One line on stdin: an operation plus an optional id echoed in the reply.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeEnvelope {
    #[serde(rename = "requestId", default)]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub request: BridgeRequest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BridgeRequest {
    CreateScene {
        id: String,
        #[serde(rename = "type", default = "default_scene_type")]
        scene_type: String,
        #[serde(default)]
        props: Value,
    },
    UpdateScene {
        id: String,
        #[serde(default)]
        props: Value,
    },
    ActivateScene {
        id: String,
    },
    DeactivateScene {
        id: String,
    },
    DestroyScene {
        id: String,
    },
    GetSceneState {
        id: String,
    },
    GetActiveSceneId,
    CreateNode {
        id: String,
        #[serde(rename = "type")]
        tag: String,
        #[serde(default)]
        props: Value,
    },
    UpdateNode {
        id: String,
        #[serde(default)]
        props: Value,
    },
    DeleteNode {
        id: String,
    },
    AddChild {
        parent: String,
        child: String,
    },
    RemoveChild {
        parent: String,
        child: String,
    },
    BindEvent {
        id: String,
        event: String,
        callback: String,
    },
    UnbindEvent {
        id: String,
        event: String,
    },
    GetMemoryStats,
    PerformMemoryCleanup {
        #[serde(default)]
        aggressive: bool,
    },
    LowMemory,
    TrimMemory {
        level: i32,
    },
    ProjectPoint {
        token: String,
        point: [f64; 3],
        #[serde(default)]
        viewport: Option<Viewport>,
    },
    Shutdown,
}

fn default_scene_type() -> String {
    "scene".to_string()
}

/// One line on stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn reply(request_id: Option<Value>, result: Value) -> Self {
        Self {
            r#type: "reply".to_string(),
            request_id,
            token: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            request_id,
            token: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn resolved(token: &str, value: Value) -> Self {
        Self {
            r#type: "resolved".to_string(),
            request_id: None,
            token: Some(token.to_string()),
            result: Some(value),
            error: None,
        }
    }

    pub fn rejected(token: &str, error: impl Into<String>) -> Self {
        Self {
            r#type: "rejected".to_string(),
            request_id: None,
            token: Some(token.to_string()),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Lifecycle notification, e.g. `sceneActivated` with the scene id.
    pub fn event(name: &str, payload: Value) -> Self {
        Self {
            r#type: name.to_string(),
            request_id: None,
            token: None,
            result: Some(payload),
            error: None,
        }
    }
}
