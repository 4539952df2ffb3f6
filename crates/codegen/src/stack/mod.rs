//! Scheduling of IR values onto the VM's operand stack.

mod model;
mod scheduler;

pub use model::{StackModel, STACK_WINDOW};
pub use scheduler::schedule_function;
