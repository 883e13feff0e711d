use crate::models::Listing;
use crate::parser::fields::{
    clean_listing_name, extract_address_from_text, extract_id_from_href, extract_price,
    extract_size, guess_address, normalize_space, split_lines,
};
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Class-name patterns that usually wrap a card's location line, in priority order.
static ADDRESS_CLASS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["address", "location", "region"]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
});

/// Card attributes that sometimes carry the listing id when the href does not.
const ID_DATA_ATTRIBUTES: [&str; 4] = ["data-id", "data-adid", "data-item-id", "data-tracking-id"];

/// All text nodes below `element`, trimmed and joined with `sep`.
pub fn element_text(element: ElementRef<'_>, sep: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Turn one result card into a listing.
///
/// Returns `None` when the card has no anchor with an href or the href cannot
/// be resolved against `base`; the caller skips such cards.
pub fn extract_by_card(card: ElementRef<'_>, base: &Url) -> Option<Listing> {
    let anchor = card.select(&ANCHOR_SELECTOR).next()?;
    let href = anchor.value().attr("href")?;
    let link = match base.join(href) {
        Ok(url) => url.to_string(),
        Err(e) => {
            debug!("Unresolvable card href {}: {}", href, e);
            return None;
        }
    };

    let raw_title = normalize_space(&element_text(anchor, " "));
    let text = normalize_space(&element_text(card, " "));

    let title = clean_listing_name(&raw_title);
    let price = extract_price(&text);
    let size = extract_size(&text);

    let address = extract_address_from_text(&text)
        .or_else(|| address_from_classes(card))
        .or_else(|| guess_address(&split_lines(&element_text(card, "\n"))));

    let id = extract_id_from_href(href).or_else(|| {
        ID_DATA_ATTRIBUTES
            .iter()
            .find_map(|attr| card.value().attr(attr))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    });

    Some(Listing {
        id,
        title: Some(title).filter(|t| !t.is_empty()),
        price,
        address,
        size,
        link,
        ..Listing::default()
    })
}

/// Text of the first descendant whose class looks like a location wrapper.
fn address_from_classes(card: ElementRef<'_>) -> Option<String> {
    for pattern in ADDRESS_CLASS_PATTERNS.iter() {
        let found = card
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().classes().any(|class| pattern.is_match(class)));

        if let Some(element) = found {
            let text = normalize_space(&element_text(element, " "));
            return extract_address_from_text(&text).or(Some(text).filter(|t| !t.is_empty()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn base() -> Url {
        Url::parse("https://www.willhaben.at").unwrap()
    }

    fn first_article(doc: &Html) -> ElementRef<'_> {
        let sel = Selector::parse("article").unwrap();
        doc.select(&sel).next().unwrap()
    }

    #[test]
    fn extracts_worked_example() {
        let doc = Html::parse_document(
            r#"<article>
                <a href="/iad/immobilien/d/mietwohnungen/wien/wien-1190-doebling/sonnige-wohnung-123456789/">Sonnige 3-Zimmer Wohnung 1190 Wien, 19. Bezirk 64 m² € 1.735</a>
                <span>€ 1.735</span>
                <span>1190 Wien, 19. Bezirk, Döbling</span>
                <span>64 m²</span>
                <span>3 Zimmer</span>
            </article>"#,
        );
        let listing = extract_by_card(first_article(&doc), &base()).unwrap();

        assert_eq!(listing.price.as_deref(), Some("€ 1.735"));
        assert_eq!(listing.size.as_deref(), Some("64 m²"));
        assert!(listing.address.as_deref().unwrap().contains("1190 Wien"));
        assert_eq!(listing.title.as_deref(), Some("Sonnige 3-Zimmer Wohnung"));
        assert_eq!(listing.id, None);
        assert_eq!(
            listing.link,
            "https://www.willhaben.at/iad/immobilien/d/mietwohnungen/wien/wien-1190-doebling/sonnige-wohnung-123456789/"
        );
    }

    #[test]
    fn no_anchor_means_no_listing() {
        let doc = Html::parse_document("<article><span>€ 900</span></article>");
        assert!(extract_by_card(first_article(&doc), &base()).is_none());
    }

    #[test]
    fn id_falls_back_to_data_attribute() {
        let doc = Html::parse_document(
            r#"<article data-adid="555666777"><a href="/iad/immobilien/d/wohnung">Altbau</a></article>"#,
        );
        let listing = extract_by_card(first_article(&doc), &base()).unwrap();
        assert_eq!(listing.id.as_deref(), Some("555666777"));
    }

    #[test]
    fn id_from_query_parameter_wins() {
        let doc = Html::parse_document(
            r#"<article data-id="1"><a href="/iad/immobilien/detail?adId=424242">Loft</a></article>"#,
        );
        let listing = extract_by_card(first_article(&doc), &base()).unwrap();
        assert_eq!(listing.id.as_deref(), Some("424242"));
    }

    #[test]
    fn address_from_location_class() {
        let doc = Html::parse_document(
            r#"<article>
                <a href="/iad/immobilien/d/x/123456/">Gartenwohnung</a>
                <div class="Box-sc-location">Hallein, Salzburg</div>
            </article>"#,
        );
        let listing = extract_by_card(first_article(&doc), &base()).unwrap();
        assert_eq!(listing.address.as_deref(), Some("Hallein, Salzburg"));
    }

    #[test]
    fn address_from_line_heuristic() {
        let doc = Html::parse_document(
            r#"<article>
                <a href="/iad/immobilien/d/x/123456/">Kleine Garconniere</a>
                <p>Innsbruck Zentrum, Tirol</p>
                <p>€ 650</p>
            </article>"#,
        );
        let listing = extract_by_card(first_article(&doc), &base()).unwrap();
        assert_eq!(listing.address.as_deref(), Some("Innsbruck Zentrum, Tirol"));
        assert_eq!(listing.price.as_deref(), Some("€ 650"));
        assert_eq!(listing.size, None);
    }
}
