//! Integration tests for Listing-Harvest
//!
//! Every test serves a small listing site from a wiremock server and runs
//! real crawls against it with an on-disk SQLite database.

mod crawl_tests;
mod resume_tests;
mod support;
