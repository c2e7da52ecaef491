pub mod actions;
pub mod change;
pub mod commission;
pub mod error;
pub mod fee;
pub mod funder;
pub mod parallel;
pub mod random;
pub mod services;
pub mod storage;
pub mod sweeper;
pub mod tx;
