pub mod args;
pub mod context;

pub use args::Cli;
