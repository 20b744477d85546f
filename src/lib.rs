pub mod cli;
pub mod service;
