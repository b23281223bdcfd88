//! The `courier` command line tool: settings, input loading and signal
//! handling around [`courier_dispatch::Campaign`].

pub mod app;
pub mod cli;
pub mod settings;
pub mod signals;
