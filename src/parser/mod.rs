//! Listing extraction from rendered result pages.
//!
//! `page` walks the anchors and decides which cards count, `card` turns a
//! single card into a [`Listing`](crate::models::Listing), `fields` holds the
//! text heuristics, and `jsonld` reads the structured-data side table.

pub mod card;
pub mod fields;
pub mod jsonld;
pub mod page;

pub use card::extract_by_card;
pub use page::{non_promoted_listing_links, parse_listings};
