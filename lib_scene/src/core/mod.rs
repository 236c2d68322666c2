//! # Core Engine Module
//!
//! Scene bookkeeping and memory-pressure handling for a bridge that lets a
//! scripting front end drive a separate renderer.
//!
//! ## Core Components:
//!
//! - **`weak_registry`**: Id-keyed map of non-owning references. Lookups fail
//!   once the owner drops the referent; `reap_stale` purges such entries.
//!
//! - **`lifecycle`**: The scene state machine. Tracks at most one active scene
//!   and tears scenes down deterministically through the renderer.
//!
//! - **`components`**: Nodes inside scene subtrees, linked by id.
//!
//! - **`memory_monitor`**: Pressure classification with hysteresis and an
//!   aggressive-cleanup cooldown.
//!
//! - **`eviction`**: Oldest-first selection of reusable scenes to destroy under
//!   critical pressure.
//!
//! - **`async_dispatcher`**: Exactly-once completion of background work keyed
//!   by opaque tokens.
//!
//! - **`context`**: Wires the pieces above into the object the control loop
//!   owns.

/// Injectable millisecond clocks.
pub mod clock;
/// Id-linked component tree and the closed set of component kinds.
pub mod components;
/// The engine's root object.
pub mod context;
/// Error taxonomy.
pub mod error;
/// Age- and state-ordered eviction.
pub mod eviction;
/// Scene state machine.
pub mod lifecycle;
/// Pressure classification and cleanup decisions.
pub mod memory_monitor;
/// The renderer collaborator interface.
pub mod renderer;
/// Serializable memory and cleanup reports.
pub mod report;
/// Per-scene metadata.
pub mod scene_record;
/// Token-correlated background work.
pub mod async_dispatcher;
/// Weak-reference registry.
pub mod weak_registry;
