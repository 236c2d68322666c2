//! # Control Loop
//!
//! The single task that owns the [`SceneContext`]. Callers on any task talk to
//! it through a cloneable [`ControlHandle`]: each call becomes a
//! [`ControlRequest`] carrying a oneshot responder, sent over an unbounded
//! channel. Requests therefore execute strictly in submission order and never
//! contend on a lock.
//!
//! The loop also consumes completions from the [`AsyncResultDispatcher`] and
//! hands them to a [`ResultSink`], and drives the memory monitor from a
//! periodic tick. On shutdown it rejects every pending async token, delivers
//! the rejections, and tears down all scenes and components.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::async_dispatcher::{AsyncResultDispatcher, Completion};
use crate::core::context::SceneContext;
use crate::core::error::{Result, SceneError};
use crate::core::memory_monitor::TrimLevel;
use crate::core::renderer::SceneType;
use crate::core::report::{CleanupReport, MemoryReport};
use crate::core::scene_record::{SceneId, SceneState};

/// Operations the control loop executes on behalf of callers.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    CreateScene {
        id: String,
        scene_type: SceneType,
        props: Value,
    },
    UpdateScene {
        id: String,
        props: Value,
    },
    ActivateScene(String),
    DeactivateScene(String),
    DestroyScene(String),
    GetSceneState(String),
    GetActiveSceneId,
    CreateNode {
        id: String,
        tag: String,
        props: Value,
    },
    UpdateNode {
        id: String,
        props: Value,
    },
    DeleteNode(String),
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
        aggressive: bool,
    },
    LowMemory,
    TrimMemory(TrimLevel),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlReply {
    Done,
    SceneId(SceneId),
    SceneState(Option<SceneState>),
    ActiveSceneId(Option<SceneId>),
    Unbound(bool),
    MemoryStats(Box<MemoryReport>),
    Cleanup(Option<CleanupReport>),
}

pub type ControlResult = Result<ControlReply>;

// Wraps a command with the channel its result goes back on.
pub struct ControlRequest {
    pub command: ControlCommand,
    pub responder: oneshot::Sender<ControlResult>,
}

/// Receives async completions on the control loop.
pub trait ResultSink: Send {
    fn on_resolved(&mut self, token: &str, value: Value);
    fn on_rejected(&mut self, token: &str, error: &SceneError);
}

/// What the loop tore down when it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub scenes: usize,
    pub components: usize,
    pub cancelled_tokens: usize,
}

#[derive(Clone)]
pub struct ControlHandle {
    requests: mpsc::UnboundedSender<ControlRequest>,
    dispatcher: AsyncResultDispatcher,
    shutdown: CancellationToken,
}

fn unexpected(reply: ControlReply) -> SceneError {
    SceneError::TaskFailed(format!("unexpected control reply: {reply:?}"))
}

impl ControlHandle {
    /// Sends a command and waits for its result.
    pub async fn send(&self, command: ControlCommand) -> ControlResult {
        let (tx, rx) = oneshot::channel();
        let request = ControlRequest {
            command,
            responder: tx,
        };
        self.requests
            .send(request)
            .map_err(|_| SceneError::ControlLoopClosed)?;
        rx.await.map_err(|_| SceneError::ControlLoopClosed)?
    }

    async fn send_done(&self, command: ControlCommand) -> Result<()> {
        match self.send(command).await? {
            ControlReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn create_scene(&self, id: &str, scene_type: SceneType, props: Value) -> Result<SceneId> {
        let command = ControlCommand::CreateScene {
            id: id.to_string(),
            scene_type,
            props,
        };
        match self.send(command).await? {
            ControlReply::SceneId(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_scene(&self, id: &str, props: Value) -> Result<()> {
        self.send_done(ControlCommand::UpdateScene {
            id: id.to_string(),
            props,
        })
        .await
    }

    pub async fn activate_scene(&self, id: &str) -> Result<()> {
        self.send_done(ControlCommand::ActivateScene(id.to_string())).await
    }

    pub async fn deactivate_scene(&self, id: &str) -> Result<()> {
        self.send_done(ControlCommand::DeactivateScene(id.to_string())).await
    }

    pub async fn destroy_scene(&self, id: &str) -> Result<()> {
        self.send_done(ControlCommand::DestroyScene(id.to_string())).await
    }

    pub async fn scene_state(&self, id: &str) -> Result<Option<SceneState>> {
        match self.send(ControlCommand::GetSceneState(id.to_string())).await? {
            ControlReply::SceneState(state) => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    pub async fn active_scene_id(&self) -> Result<Option<SceneId>> {
        match self.send(ControlCommand::GetActiveSceneId).await? {
            ControlReply::ActiveSceneId(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn memory_stats(&self) -> Result<MemoryReport> {
        match self.send(ControlCommand::GetMemoryStats).await? {
            ControlReply::MemoryStats(report) => Ok(*report),
            other => Err(unexpected(other)),
        }
    }

    pub async fn perform_memory_cleanup(&self, aggressive: bool) -> Result<CleanupReport> {
        match self.send(ControlCommand::PerformMemoryCleanup { aggressive }).await? {
            ControlReply::Cleanup(Some(report)) => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    /// Runs `work` in the background; its result reaches the loop's
    /// [`ResultSink`] exactly once. Once the loop has stopped, the token is
    /// refused with [`SceneError::Cancelled`] instead.
    pub fn dispatch<F>(&self, token: impl Into<String>, work: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<Value, String> + Send + 'static,
    {
        self.dispatcher.dispatch(token, work)
    }

    /// Asks the loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

pub struct ControlLoop {
    context: SceneContext,
    requests: mpsc::UnboundedReceiver<ControlRequest>,
    completions: mpsc::UnboundedReceiver<Completion>,
    dispatcher: AsyncResultDispatcher,
    sink: Box<dyn ResultSink>,
    tick_interval: Duration,
    shutdown: CancellationToken,
}

impl ControlLoop {
    /// Builds the loop and the handle callers use to reach it.
    pub fn new(
        mut context: SceneContext,
        sink: Box<dyn ResultSink>,
        tick_interval: Duration,
        shutdown: CancellationToken,
    ) -> (Self, ControlHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (dispatcher, completions) = AsyncResultDispatcher::new();
        context.attach_dispatcher(dispatcher.clone());

        let handle = ControlHandle {
            requests: request_tx,
            dispatcher: dispatcher.clone(),
            shutdown: shutdown.clone(),
        };
        let control = Self {
            context,
            requests: request_rx,
            completions,
            dispatcher,
            sink,
            tick_interval,
            shutdown,
        };
        (control, handle)
    }

    /// Runs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) -> ShutdownSummary {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        log::info!("Control loop started (tick every {:?})", self.tick_interval);
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    log::info!("Control loop shutdown requested");
                    break;
                }
                request = self.requests.recv() => {
                    let Some(ControlRequest { command, responder }) = request else {
                        log::info!("All control handles dropped, stopping control loop");
                        break;
                    };
                    let result = self.handle(command);
                    if responder.send(result).is_err() {
                        log::debug!("Caller went away before its reply was sent");
                    }
                }
                Some(completion) = self.completions.recv() => {
                    self.deliver(completion);
                }
                _ = ticker.tick() => {
                    if let Some(report) = self.context.on_tick() {
                        log::debug!("Tick cleanup removed {} scenes", report.removed_scene_count());
                    }
                }
            }
        }

        self.stop()
    }

    fn stop(mut self) -> ShutdownSummary {
        let cancelled = self.dispatcher.shutdown();
        while let Ok(completion) = self.completions.try_recv() {
            self.deliver(completion);
        }
        let (scenes, components) = self.context.teardown_all();
        ShutdownSummary {
            scenes,
            components,
            cancelled_tokens: cancelled.len(),
        }
    }

    fn deliver(&mut self, completion: Completion) {
        match completion.outcome {
            Ok(value) => self.sink.on_resolved(&completion.token, value),
            Err(err) => self.sink.on_rejected(&completion.token, &err),
        }
    }

    fn handle(&mut self, command: ControlCommand) -> ControlResult {
        let ctx = &mut self.context;
        let reply = match command {
            ControlCommand::CreateScene {
                id,
                scene_type,
                props,
            } => ControlReply::SceneId(ctx.create_scene(&id, scene_type, props)?),
            ControlCommand::UpdateScene { id, props } => {
                ctx.update_scene(&id, props)?;
                ControlReply::Done
            }
            ControlCommand::ActivateScene(id) => {
                ctx.activate_scene(&id)?;
                ControlReply::Done
            }
            ControlCommand::DeactivateScene(id) => {
                ctx.deactivate_scene(&id)?;
                ControlReply::Done
            }
            ControlCommand::DestroyScene(id) => {
                ctx.destroy_scene(&id)?;
                ControlReply::Done
            }
            ControlCommand::GetSceneState(id) => ControlReply::SceneState(ctx.scene_state(&id)),
            ControlCommand::GetActiveSceneId => ControlReply::ActiveSceneId(ctx.active_scene_id()),
            ControlCommand::CreateNode { id, tag, props } => {
                ctx.create_node(&id, &tag, props)?;
                ControlReply::Done
            }
            ControlCommand::UpdateNode { id, props } => {
                ctx.update_node(&id, props)?;
                ControlReply::Done
            }
            ControlCommand::DeleteNode(id) => {
                ctx.delete_node(&id)?;
                ControlReply::Done
            }
            ControlCommand::AddChild { parent, child } => {
                ctx.add_child(&parent, &child)?;
                ControlReply::Done
            }
            ControlCommand::RemoveChild { parent, child } => {
                ctx.remove_child(&parent, &child)?;
                ControlReply::Done
            }
            ControlCommand::BindEvent {
                id,
                event,
                callback,
            } => {
                ctx.bind_event(&id, &event, &callback)?;
                ControlReply::Done
            }
            ControlCommand::UnbindEvent { id, event } => {
                ControlReply::Unbound(ctx.unbind_event(&id, &event)?)
            }
            ControlCommand::GetMemoryStats => ControlReply::MemoryStats(Box::new(ctx.memory_stats())),
            ControlCommand::PerformMemoryCleanup { aggressive } => {
                ControlReply::Cleanup(Some(ctx.perform_memory_cleanup(aggressive)))
            }
            ControlCommand::LowMemory => ControlReply::Cleanup(ctx.on_low_memory()),
            ControlCommand::TrimMemory(level) => ControlReply::Cleanup(ctx.on_trim_memory(level)),
        };
        Ok(reply)
    }
}

/// Builds a [`ControlLoop`] and spawns it on the current runtime.
pub fn spawn_control_loop(
    context: SceneContext,
    sink: Box<dyn ResultSink>,
    tick_interval: Duration,
    shutdown: CancellationToken,
) -> (ControlHandle, JoinHandle<ShutdownSummary>) {
    let (control, handle) = ControlLoop::new(context, sink, tick_interval, shutdown);
    let task = tokio::spawn(control.run());
    (handle, task)
}
