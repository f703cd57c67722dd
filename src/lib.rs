pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod lottery;
pub mod notify;
pub mod runtime;
pub mod scheduler;
pub mod support;
