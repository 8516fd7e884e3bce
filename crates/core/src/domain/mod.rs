pub mod event;
pub mod rule;
pub mod task;
