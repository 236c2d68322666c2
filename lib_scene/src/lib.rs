// Declare the modules to re-export
pub mod configs;
pub mod control;
pub mod core;
pub mod utils;

// Re-export everything
pub use crate::configs::engine_config::*;
pub use crate::control::*;
pub use crate::core::async_dispatcher::*;
pub use crate::core::clock::*;
pub use crate::core::components::*;
pub use crate::core::context::*;
pub use crate::core::error::{RendererError, SceneError};
pub use crate::core::eviction::*;
pub use crate::core::lifecycle::*;
pub use crate::core::memory_monitor::*;
pub use crate::core::renderer::*;
pub use crate::core::report::*;
pub use crate::core::scene_record::*;
pub use crate::core::weak_registry::*;
pub use crate::utils::sys_info::*;
