pub mod billing;
pub mod config;
pub mod error;
pub mod groups;
pub mod models;
pub mod pms;
pub mod pricing;
pub mod retry;
pub mod routes;
pub mod store;
