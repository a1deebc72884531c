//! Host-facing interfaces: an async session and a synchronous callback adapter

pub mod callback;
pub mod session;

pub use callback::{CallbackHandle, CallbackTracker, EventCallback, MotionCallback, PositionCallback};
pub use session::{SampleSender, SessionHandle, SessionOutputs, TrackingSession};
