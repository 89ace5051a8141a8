//! Library crate for torrserve-finder exposing reusable modules.
pub mod api;
pub mod chooser;
pub mod config;
pub mod discovery;
pub mod hosts;
pub mod netdetect;
pub mod probe;
pub mod search;
pub mod select;
pub mod server;
pub mod settings;
pub mod sink;
pub mod types;
pub mod watcher;
