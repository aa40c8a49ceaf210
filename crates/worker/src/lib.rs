pub mod executors;
pub mod registry;
pub mod runner;

pub use registry::ExecutorRegistry;
pub use runner::TaskRunner;
