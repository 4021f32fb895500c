//! Live document updates over WebSocket.
//!
//! Clients connect to `/ws`, subscribe to one owner's documents and then
//! receive `progress`, `completed` and `failed` events as the status relay
//! publishes them. Delivery is best effort; the document row stays the
//! source of truth.

mod handlers;
mod messages;
mod registry;

pub use handlers::handle_ws_connection;
pub use messages::LiveEvent;
pub use registry::{LivePublisher, LiveRegistry};
