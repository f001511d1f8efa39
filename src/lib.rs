#![forbid(unsafe_code)]

pub mod autosave;
pub mod cli;
pub mod commands;
pub mod config;
pub mod editor;
pub mod logging;
pub mod model;
pub mod ordering;
pub mod persistence;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod working_copy;
