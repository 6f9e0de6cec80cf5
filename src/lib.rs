//! Workstation usage tracking in two halves: a capture agent that
//! samples the foreground window, idle time and keystrokes on employee
//! machines, and a server that ingests those observations, classifies
//! them against administrator-configured keywords and serves aggregated
//! usage reports.

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod model;
pub mod platform;
pub mod probe;
pub mod server;
pub mod utils;
