pub mod runner;
pub mod task_check;

pub use runner::Runner;
pub use task_check::{TaskCheckEngine, TaskPlan};
