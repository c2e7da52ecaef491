pub mod broadcast;
pub mod queue;
