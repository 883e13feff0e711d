use crate::models::Listing;
use crate::parser::card::{element_text, extract_by_card};
use crate::parser::jsonld::extract_jsonld_titles;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

/// Path namespace every listing link lives under.
pub const LISTING_PATH_MARKER: &str = "/iad/immobilien/";

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

static CARD_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)result|card|box|tile").unwrap());

static PROMOTED_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)TOP[- ]ANZEIGEN?").unwrap());

const PROMOTED_CLASS_KEYWORDS: [&str; 10] = [
    "top-anzeige",
    "topanzeige",
    "top_anzeige",
    "promoted",
    "featured",
    "sponsored",
    "premium",
    "highlight",
    "vip",
    "boost",
];

const PROMOTED_DATA_ATTRIBUTES: [&str; 2] = ["data-promoted", "data-featured"];

/// How many wrappers above the card are checked for promoted classes.
const PROMOTED_ANCESTOR_LEVELS: usize = 3;

/// Only detail pages count; search/category links share the namespace.
fn is_detail_href(href: &str) -> bool {
    href.contains("/d/") || href.contains("?adId=")
}

/// Nearest `article`, then `li`, then card-ish `div`, then the plain parent.
fn find_card(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let ancestors = || anchor.ancestors().filter_map(ElementRef::wrap);

    ancestors()
        .find(|el| el.value().name() == "article")
        .or_else(|| ancestors().find(|el| el.value().name() == "li"))
        .or_else(|| {
            ancestors().find(|el| {
                el.value().name() == "div" && el.value().classes().any(|c| CARD_CLASS_RE.is_match(c))
            })
        })
        .or_else(|| anchor.parent().and_then(ElementRef::wrap))
}

fn has_promoted_class(element: ElementRef<'_>) -> bool {
    let classes = element
        .value()
        .classes()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    PROMOTED_CLASS_KEYWORDS.iter().any(|kw| classes.contains(kw))
}

/// Why a card was rejected as a paid placement, if it was.
fn promoted_reason(card: ElementRef<'_>) -> Option<&'static str> {
    if has_promoted_class(card) {
        return Some("class");
    }
    if PROMOTED_TEXT_RE.is_match(&element_text(card, " ")) {
        return Some("text");
    }
    if PROMOTED_DATA_ATTRIBUTES
        .iter()
        .any(|attr| card.value().attr(attr).is_some_and(|v| !v.is_empty()))
    {
        return Some("data-attr");
    }
    if card
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(PROMOTED_ANCESTOR_LEVELS)
        .any(has_promoted_class)
    {
        return Some("parent class");
    }
    None
}

/// Walk listing anchors in document order and yield `(link, card)` for each
/// organic detail-page card. Links are unique; promoted cards are dropped.
fn organic_cards<'a>(document: &'a Html, base: &Url) -> Vec<(String, ElementRef<'a>)> {
    let mut seen = HashSet::new();
    let mut cards = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains(LISTING_PATH_MARKER) {
            continue;
        }
        let Ok(link) = base.join(href).map(|u| u.to_string()) else {
            continue;
        };
        if seen.contains(&link) || !is_detail_href(href) {
            continue;
        }

        let Some(card) = find_card(anchor) else {
            continue;
        };
        // Promoted copies must not claim the link; the organic card may follow.
        if let Some(reason) = promoted_reason(card) {
            info!("Skipping promoted listing ({}): {}", reason, link);
            continue;
        }
        seen.insert(link.clone());
        cards.push((link, card));
    }

    cards
}

/// Unique organic listing links in the order they appear on the page.
pub fn non_promoted_listing_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    organic_cards(&document, base)
        .into_iter()
        .map(|(link, _)| link)
        .collect()
}

/// Extract every organic listing on a result page.
///
/// Cards are authoritative; JSON-LD only fills in missing titles. Records
/// with neither id nor title are dropped, and a link seen twice keeps the
/// later extraction in the earlier position.
pub fn parse_listings(html: &str, base: &Url) -> Vec<Listing> {
    let document = Html::parse_document(html);

    let jsonld_titles = extract_jsonld_titles(&document, base);
    debug!("Found {} items in JSON-LD", jsonld_titles.len());

    let mut results = Vec::new();
    for (link, card) in organic_cards(&document, base) {
        let Some(mut item) = extract_by_card(card, base) else {
            continue;
        };
        if item.title.is_none() {
            if let Some(title) = jsonld_titles.get(&link).filter(|t| !t.is_empty()) {
                item.title = Some(title.clone());
            }
        }
        results.push(item);
    }

    let mut unique: Vec<Listing> = Vec::new();
    let mut index_by_link: HashMap<String, usize> = HashMap::new();
    for item in results
        .into_iter()
        .filter(|item| item.id.is_some() || item.title.is_some())
    {
        match index_by_link.get(&item.link) {
            Some(&idx) => unique[idx] = item,
            None => {
                index_by_link.insert(item.link.clone(), unique.len());
                unique.push(item);
            }
        }
    }

    info!("Parsed {} unique listings", unique.len());
    unique
}
