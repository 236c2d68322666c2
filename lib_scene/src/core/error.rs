//! # Engine Error Types
//!
//! Every lifecycle operation returns a typed [`Result`]. Nothing in the engine
//! panics across the control-loop boundary; memory-pressure handling logs its
//! failures instead of returning them.

use thiserror::Error;

use crate::core::scene_record::SceneState;

/// Errors reported by the renderer collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RendererError {
    /// The renderer could not build a native object.
    #[error("native construction failed: {0}")]
    Construction(String),

    /// The renderer could not attach or detach a scene from its output.
    #[error("output binding failed: {0}")]
    Output(String),

    /// The renderer's teardown hook failed.
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// Any other renderer-side failure.
    #[error("{0}")]
    Other(String),
}

/// The engine's error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SceneError {
    /// The id is unknown, or its native referent has already been destroyed.
    #[error("'{0}' not found")]
    NotFound(String),

    /// A live record already exists for this id.
    #[error("'{0}' already exists")]
    DuplicateId(String),

    /// The requested state change is not allowed from the current state.
    #[error("invalid transition for '{id}': {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: SceneState,
        to: SceneState,
    },

    /// The renderer threw during teardown. Bookkeeping is removed regardless.
    #[error("teardown of '{id}' failed: {reason}")]
    TeardownFailed { id: String, reason: String },

    /// A pending async token was rejected because the dispatcher shut down.
    #[error("operation cancelled")]
    Cancelled,

    /// The renderer refused to build the native object for a create call.
    #[error("could not create '{id}': {source}")]
    CreateFailed {
        id: String,
        #[source]
        source: RendererError,
    },

    /// A renderer call other than construction failed.
    #[error("renderer error: {0}")]
    Renderer(#[from] RendererError),

    /// The scene type tag is neither `scene` nor `arScene`.
    #[error("unknown scene type '{0}'")]
    UnknownSceneType(String),

    /// The component type tag does not name a known component kind.
    #[error("unknown component type '{0}'")]
    UnknownComponentType(String),

    /// A parent/child link would break the tree shape.
    #[error("cannot link '{child}' under '{parent}': {reason}")]
    InvalidHierarchy {
        parent: String,
        child: String,
        reason: String,
    },

    /// A token is already pending in the dispatcher.
    #[error("token '{0}' is already pending")]
    DuplicateToken(String),

    /// Background work failed or panicked.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The control loop is no longer accepting requests.
    #[error("control loop closed")]
    ControlLoopClosed,
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, SceneError>;
