//! Network intercept layer.
//!
//! Sits between the page and the network: static resources are served
//! cache-first, API traffic network-first with a cached or synthesized
//! fallback, everything else passes through untouched. Driven by a small
//! control channel (skip-waiting, version, clear, draft save).

mod control;
mod layer;
mod policy;

pub use control::{ControlHandle, ControlMsg};
pub use layer::InterceptLayer;
pub use policy::{classify, RequestClass};
