//! CLI domain: parse, route and presentation only.
//! The route table drives the bundle registry; no ingestion logic lives here.

mod parse;
mod presentation;
mod route;

pub use parse::{Cli, Commands, OutputFormat};
pub use presentation::{
    format_active, format_activated, format_listing, format_load_result, format_unload_result,
};
pub use route::RunContext;
