//! Library half of the `printcloud` command-line client.

pub mod config;
