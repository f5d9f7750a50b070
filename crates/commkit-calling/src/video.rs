//! Ownership of native video renderers.
//!
//! Exactly one local and at most one remote stream handle are alive per
//! call. The engine disposes a renderer synchronously before clearing the
//! handle that owns it, so a renderer can never outlive its call.

use tracing::debug;
use uuid::Uuid;

use commkit_shared::Identity;

/// Opaque reference to the view a renderer produced. The UI layer holds
/// this transiently; it carries no ownership of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewHandle(pub Uuid);

/// A native renderer bound to one video stream.
///
/// `dispose` releases the underlying native resources. The engine calls it
/// exactly once per renderer; implementations may panic or log on a second
/// call but will never receive one through [`VideoStreamHandle`].
///
/// `Send + Sync` because the engine task holds stream handles across await
/// points.
pub trait VideoRenderer: Send + Sync + std::fmt::Debug {
    /// The view this renderer produces, for transient UI reads.
    fn view(&self) -> ViewHandle;

    /// Release the native renderer.
    fn dispose(&mut self);
}

/// Which participant a stream belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDirection {
    /// The device camera feed.
    Local,
    /// A remote participant's feed.
    Remote {
        participant: Identity,
        display_name: Option<String>,
    },
}

/// Exclusive ownership of one renderer and the stream it draws.
#[derive(Debug)]
pub struct VideoStreamHandle {
    pub direction: StreamDirection,
    renderer: Box<dyn VideoRenderer>,
}

impl VideoStreamHandle {
    pub fn new(direction: StreamDirection, renderer: Box<dyn VideoRenderer>) -> Self {
        Self {
            direction,
            renderer,
        }
    }

    /// The produced view, for the UI's transient read.
    pub fn view(&self) -> ViewHandle {
        self.renderer.view()
    }

    /// For remote streams, the participant that owns the feed.
    pub fn participant(&self) -> Option<&Identity> {
        match &self.direction {
            StreamDirection::Local => None,
            StreamDirection::Remote { participant, .. } => Some(participant),
        }
    }

    /// Dispose the renderer. Consumes the handle, so disposal happens
    /// exactly once and nothing can reference the renderer afterwards.
    pub fn dispose(mut self) {
        debug!(direction = ?self.direction, "disposing video renderer");
        self.renderer.dispose();
    }
}
