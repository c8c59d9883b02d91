mod hub;
pub mod protocol;
mod throttle;
mod ws;

pub use hub::{ClientId, RealtimeHub};
pub use protocol::{ClientRequest, Envelope, ServerMessage};
pub use throttle::{ConnectionThrottle, UpdateThrottle};
pub use ws::ws_handler;
