//! Load profiles executed once per virtual-user iteration.

pub mod burst_sleep;

pub use self::burst_sleep::{BurstSleep, run_iteration};
