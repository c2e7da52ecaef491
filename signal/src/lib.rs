pub mod context;
pub mod signal_handler;
