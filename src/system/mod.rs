// System-level services around the update engine.

pub mod tasks;

pub use tasks::{TaskControl, TaskCoordinator};
