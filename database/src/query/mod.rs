pub mod common;
pub mod insert;
pub mod misc;
pub mod select;
pub mod update;
pub mod upsert;
