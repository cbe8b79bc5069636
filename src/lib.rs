pub mod cache;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod prefs;
pub mod topology;
pub mod trace;
