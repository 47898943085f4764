//! Cron-driven producer of event names.
//!
//! Each active schedule unit becomes one entry task that sleeps until its
//! next fire and then pushes the unit's event name downstream. Pushes run in
//! their own tasks so a full channel never delays the engine. A control
//! channel starts, stops and restarts the engine at runtime.

mod control;
mod service;

pub use control::{SchedulerEvent, SchedulerHandle};
pub use service::{Clock, Reload, Scheduler, SystemClock, control_channel};
