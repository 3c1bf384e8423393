//! # csgraph
//!
//! Command line front end for [`csgraph_core`].
//!
//! - [`cli`]: clap command tree and command implementations
//! - [`config`]: optional TOML configuration file
//! - [`resolver`]: DOI citation lookup over HTTP

pub mod cli;
pub mod config;
pub mod resolver;
