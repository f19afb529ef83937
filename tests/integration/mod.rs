//! Integration tests for the ptops ingestion engine

mod bundle_lifecycle;
mod config_integration;
mod ingestion;
mod test_utils;
