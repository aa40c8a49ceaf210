pub mod scheduler;
pub mod trigger;

pub use scheduler::TaskScheduler;
pub use trigger::Trigger;
