//! Configuration and wiring for the `herald` command line tool.

pub mod controller;

pub use controller::{Herald, Services, find_config_file, parse_recipients};
