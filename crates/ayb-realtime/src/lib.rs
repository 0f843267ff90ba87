//! The realtime hub: listens for Postgres `NOTIFY ayb_changes` and fans
//! change events out to SSE subscribers with a per-event RLS visibility
//! check.

mod event;
mod hub;
mod listener;
mod subscription;
mod visibility;

pub use event::{Action, ChangeEvent, OutboundEvent};
pub use hub::Hub;
pub use listener::run_listener;
pub use subscription::{PushOutcome, Subscription, DEFAULT_BACKPRESSURE_CUTOFF};
pub use visibility::probe_visibility;
