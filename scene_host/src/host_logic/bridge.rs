use std::io::BufRead;

use anyhow::Result;
use lib_scene::{
    ControlCommand, ControlHandle, ControlReply, LifecycleListener, ResultSink, SceneError, SceneType,
    TrimLevel,
};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::model::{BridgeEnvelope, BridgeRequest, BridgeResponse};
use super::projection::{project_point, Viewport};

/// Reads stdin lines on a plain thread so a blocked read never holds up
/// runtime shutdown. The channel closes at EOF.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        log::debug!("stdin reader finished");
    });
    rx
}

/// Writes every response as one JSON line on stdout until all senders drop.
pub async fn write_responses(mut rx: mpsc::UnboundedReceiver<BridgeResponse>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Serves requests from `lines` until shutdown or end of input.
pub async fn run(
    handle: ControlHandle,
    mut lines: mpsc::UnboundedReceiver<String>,
    out: mpsc::UnboundedSender<BridgeResponse>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => {
                let Some(line) = line else {
                    log::info!("Input closed, shutting down");
                    shutdown.cancel();
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&handle, &out, &shutdown, &line).await;
            }
        }
    }
}

pub async fn handle_line(
    handle: &ControlHandle,
    out: &mpsc::UnboundedSender<BridgeResponse>,
    shutdown: &CancellationToken,
    line: &str,
) {
    let envelope = match serde_json::from_str::<BridgeEnvelope>(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::warn!("Rejected malformed request: {}", e);
            let _ = out.send(BridgeResponse::error(None, format!("invalid request: {e}")));
            return;
        }
    };
    let request_id = envelope.request_id;

    let response = match envelope.request {
        BridgeRequest::Shutdown => {
            shutdown.cancel();
            BridgeResponse::reply(request_id, Value::Null)
        }
        BridgeRequest::ProjectPoint {
            token,
            point,
            viewport,
        } => {
            let viewport = viewport.unwrap_or_default();
            let dispatched = handle.dispatch(token.clone(), move || {
                project_point(point, &viewport).map(|[x, y]| json!([x, y]))
            });
            match dispatched {
                Ok(()) => BridgeResponse::reply(request_id, json!({ "token": token })),
                Err(e) => BridgeResponse::error(request_id, e.to_string()),
            }
        }
        request => match execute(handle, request).await {
            Ok(value) => BridgeResponse::reply(request_id, value),
            Err(e) => {
                log::debug!("Request failed: {}", e);
                BridgeResponse::error(request_id, e.to_string())
            }
        },
    };
    let _ = out.send(response);
}

fn to_command(request: BridgeRequest) -> Result<ControlCommand, SceneError> {
    let command = match request {
        BridgeRequest::CreateScene { id, scene_type, props } => ControlCommand::CreateScene {
            id,
            scene_type: scene_type.parse::<SceneType>()?,
            props,
        },
        BridgeRequest::UpdateScene { id, props } => ControlCommand::UpdateScene { id, props },
        BridgeRequest::ActivateScene { id } => ControlCommand::ActivateScene(id),
        BridgeRequest::DeactivateScene { id } => ControlCommand::DeactivateScene(id),
        BridgeRequest::DestroyScene { id } => ControlCommand::DestroyScene(id),
        BridgeRequest::GetSceneState { id } => ControlCommand::GetSceneState(id),
        BridgeRequest::GetActiveSceneId => ControlCommand::GetActiveSceneId,
        BridgeRequest::CreateNode { id, tag, props } => ControlCommand::CreateNode { id, tag, props },
        BridgeRequest::UpdateNode { id, props } => ControlCommand::UpdateNode { id, props },
        BridgeRequest::DeleteNode { id } => ControlCommand::DeleteNode(id),
        BridgeRequest::AddChild { parent, child } => ControlCommand::AddChild { parent, child },
        BridgeRequest::RemoveChild { parent, child } => ControlCommand::RemoveChild { parent, child },
        BridgeRequest::BindEvent { id, event, callback } => ControlCommand::BindEvent { id, event, callback },
        BridgeRequest::UnbindEvent { id, event } => ControlCommand::UnbindEvent { id, event },
        BridgeRequest::GetMemoryStats => ControlCommand::GetMemoryStats,
        BridgeRequest::PerformMemoryCleanup { aggressive } => ControlCommand::PerformMemoryCleanup { aggressive },
        BridgeRequest::LowMemory => ControlCommand::LowMemory,
        BridgeRequest::TrimMemory { level } => ControlCommand::TrimMemory(TrimLevel::from_code(level)),
        BridgeRequest::ProjectPoint { .. } | BridgeRequest::Shutdown => {
            return Err(SceneError::TaskFailed("not a control command".to_string()))
        }
    };
    Ok(command)
}

async fn execute(handle: &ControlHandle, request: BridgeRequest) -> Result<Value, SceneError> {
    let reply = handle.send(to_command(request)?).await?;
    reply_value(reply).map_err(|e| SceneError::TaskFailed(format!("failed to encode reply: {e}")))
}

fn reply_value(reply: ControlReply) -> serde_json::Result<Value> {
    match reply {
        ControlReply::Done => Ok(Value::Null),
        ControlReply::SceneId(id) => Ok(Value::String(id)),
        ControlReply::SceneState(state) => serde_json::to_value(state),
        ControlReply::ActiveSceneId(id) => serde_json::to_value(id),
        ControlReply::Unbound(removed) => Ok(Value::Bool(removed)),
        ControlReply::MemoryStats(report) => serde_json::to_value(*report),
        ControlReply::Cleanup(report) => serde_json::to_value(report),
    }
}

/// Turns async completions into `resolved`/`rejected` lines.
pub struct ResultForwarder {
    out: mpsc::UnboundedSender<BridgeResponse>,
}

impl ResultForwarder {
    pub fn new(out: mpsc::UnboundedSender<BridgeResponse>) -> Self {
        Self { out }
    }
}

impl ResultSink for ResultForwarder {
    fn on_resolved(&mut self, token: &str, value: Value) {
        let _ = self.out.send(BridgeResponse::resolved(token, value));
    }

    fn on_rejected(&mut self, token: &str, error: &SceneError) {
        let _ = self.out.send(BridgeResponse::rejected(token, error.to_string()));
    }
}

/// Publishes scene lifecycle notifications to the host.
pub struct EventForwarder {
    out: mpsc::UnboundedSender<BridgeResponse>,
}

impl EventForwarder {
    pub fn new(out: mpsc::UnboundedSender<BridgeResponse>) -> Self {
        Self { out }
    }

    fn emit(&self, name: &str, payload: Value) {
        let _ = self.out.send(BridgeResponse::event(name, payload));
    }
}

impl LifecycleListener for EventForwarder {
    fn on_scene_created(&mut self, id: &str, scene_type: SceneType) {
        self.emit("sceneCreated", json!({ "id": id, "type": scene_type.as_str() }));
    }

    fn on_scene_activated(&mut self, id: &str) {
        self.emit("sceneActivated", json!({ "id": id }));
    }

    fn on_scene_deactivated(&mut self, id: &str) {
        self.emit("sceneDeactivated", json!({ "id": id }));
    }

    fn on_scene_destroyed(&mut self, id: &str) {
        self.emit("sceneDestroyed", json!({ "id": id }));
    }

    fn on_memory_warning(&mut self) {
        self.emit("memoryWarning", Value::Null);
    }
}
