//! Incremental crawler for willhaben.at rental listings.
//!
//! A result page is loaded in headless Chrome and scrolled until it runs
//! dry or reaches listings already in the store. Cards are turned into
//! [`models::Listing`] records, saved with change detection, and new ones
//! get their photo carousel captured and are announced on Telegram.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod parser;
pub mod photos;
pub mod scrapers;
pub mod store;

pub use error::{Result, ScoutError};
