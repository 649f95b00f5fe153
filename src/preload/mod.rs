//! Background preloading of upcoming resources.
//!
//! - [`PreloadScheduler`] - sequential warm-up of a queue of resources
//! - [`probe`] - free disk space checks that trigger cache eviction

mod probe;
mod scheduler;


pub use probe::{DiskSpaceProbe, SpaceProbe};
pub use scheduler::PreloadScheduler;
