//! Stream plumbing shared by both roles
//!
//! - [`DropQueue`]: bounded queue that drops per policy instead of blocking
//! - [`LatestSlot`]: one-value slot where the newest value wins
//! - [`ThrottleExt`]: latest-wins rate limiting for subscriptions

mod queue;
mod slot;
mod throttle;

pub use queue::{DropQueue, PushOutcome};
pub use slot::LatestSlot;
pub use throttle::{Throttle, ThrottleExt};
