//! Module and parameter hook protocol.
//!
//! This is the surface data-parallel training plugs into: parameters with gradient hooks,
//! modules that deliver gradients to them, and forward hooks that run after a module
//! produces its output.

pub mod module;
pub mod mul;
pub mod parameter;

pub use module::{ForwardHook, ForwardHooks, Module};
pub use mul::Mul;
pub use parameter::{GradHook, ParamId, Parameter, WeakParameter};
