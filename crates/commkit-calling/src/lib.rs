//! # commkit-calling
//!
//! The call side of commkit: a single-task [`engine::CallEngine`] that owns
//! "the active call", bridging local intent (start / accept / end / mute /
//! video) to an opaque cloud calling service behind the
//! [`backend::CallingBackend`] trait.
//!
//! All engine state is mutated on one task; callers talk to it through a
//! command channel and listen on an event channel, mirroring how the cloud
//! SDK's own callbacks are re-dispatched before touching state.

pub mod backend;
pub mod engine;
pub mod video;

pub use backend::{BackendEvent, CallingBackend, DeviceManager};
pub use engine::{CallEngine, CallEngineConfig, CallEngineEvent, CallEngineHandle};
pub use video::{StreamDirection, VideoRenderer, VideoStreamHandle, ViewHandle};
