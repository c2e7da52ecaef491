pub mod basket_cache;
pub mod client;
pub mod models;
pub mod query;
