//! Field-level heuristics for free-text listing cards.
//!
//! Every function here works on already-flattened text and returns `None`
//! when nothing usable was found. None of them infer one field from another.

use regex::Regex;
use std::sync::LazyLock;

/// Shortest line accepted by the address fallback heuristic.
pub const MIN_ADDRESS_LENGTH: usize = 6;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static ID_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]adId=(\d+)").unwrap());
static ID_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d{6,})/?$").unwrap());

static PRICE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d[\d.\s]*(?:,\d{2})?)\s*€").unwrap());

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*m²").unwrap());

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}\s+[A-ZÄÖÜa-zäöüß][^€]+?(?:Bezirk|[A-ZÄÖÜ][a-zäöüß]+)(?:,\s*[^€\d]+)?")
        .unwrap()
});
static ADDRESS_TRAILING_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\d+\s*m².*$").unwrap());
static ADDRESS_TRAILING_PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*€.*$").unwrap());
static ADDRESS_TRAILING_ROOMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\d+\s*Zimmer.*$").unwrap());

static REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:Wien|Bezirk|Niederösterreich|Oberösterreich|Steiermark|Burgenland|Salzburg|Tirol|Vorarlberg|Kärnten)\b",
    )
    .unwrap()
});
static METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)€|m²|Zimmer|Gesamtmiete|Kaution|Betriebskosten").unwrap()
});
static LINE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[•\n\r]+| {2,}").unwrap());

// Title cleanup, applied in this order. Price and size go before whitespace
// normalization so their separators are still intact.
static TITLE_DISTRICT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d{4}\s+Wien,\s+\d+\.\s+Bezirk[^€]*").unwrap());
static TITLE_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d+(?:[.,]\d+)?\s*m²").unwrap());
static TITLE_PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*€\s*[\d.\s,]+").unwrap());
static TITLE_ROOMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d+\s+Zimmer\b").unwrap());
static TITLE_AMENITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:Balkon|Loggia|Terrasse|Garten)\s*$").unwrap());
static TITLE_COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s+(?:Blueground|Hubner|EHL|OPTIN|KALANDRA|Mayrhofer|MP|EDEX|Mittelsmann|Zirkel)(?:\s+(?:Austria\s+)?(?:GmbH|OG|KG|AG|Immobilien))?\s*$",
    )
    .unwrap()
});
static TITLE_LEGAL_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:GmbH|OG|KG|AG|Immobilien|Privat)\s*$").unwrap()
});
static TITLE_STREET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),\s+[A-ZÄÖÜ][a-zäöüß]+(?:straße|gasse|platz|weg)\s*$").unwrap()
});
static TITLE_EDGE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[,\s]+|[,\s]+$").unwrap());

/// Collapse every whitespace run into a single space and trim.
pub fn normalize_space(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Listing id from `?adId=` or a trailing numeric path segment of 6+ digits.
pub fn extract_id_from_href(href: &str) -> Option<String> {
    if let Some(caps) = ID_QUERY_RE.captures(href) {
        return Some(caps[1].to_string());
    }
    ID_PATH_RE.captures(href).map(|caps| caps[1].to_string())
}

/// Price in Austrian notation (`€ 1.234,50`), falling back to `1.234 €`.
pub fn extract_price(text: &str) -> Option<String> {
    for (pos, _) in text.match_indices('€') {
        let rest = text[pos + '€'.len_utf8()..].trim_start();
        if let Some(amount) = euro_prefixed_amount(rest) {
            return Some(format!("€ {}", normalize_space(amount)));
        }
    }

    PRICE_SUFFIX_RE
        .captures(text)
        .map(|caps| format!("{} €", normalize_space(&caps[1])))
}

fn is_amount_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c.is_whitespace()
}

/// Shortest run of digits, dots and spaces (plus an optional `,dd`) that is
/// followed by something other than more of the number. A following
/// standalone 4-digit token is a postal code and ends the amount; any other
/// digit group after a space is a thousands group and extends it.
fn euro_prefixed_amount(rest: &str) -> Option<&str> {
    let run_end = rest
        .char_indices()
        .find(|(_, c)| !is_amount_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());

    for (i, c) in rest[..run_end].char_indices() {
        let end = i + c.len_utf8();
        if !rest[..end].chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Some(decimals) = decimal_suffix(&rest[end..]) {
            let with_decimals = end + decimals;
            if amount_terminates(&rest[with_decimals..]) {
                return Some(&rest[..with_decimals]);
            }
        }
        if amount_terminates(&rest[end..]) {
            return Some(&rest[..end]);
        }
    }
    None
}

fn decimal_suffix(after: &str) -> Option<usize> {
    let bytes = after.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b',' && bytes[1].is_ascii_digit() && bytes[2].is_ascii_digit()
    {
        Some(3)
    } else {
        None
    }
}

fn amount_terminates(after: &str) -> bool {
    let Some(first) = after.chars().next() else {
        return true;
    };
    if !(first.is_ascii_digit() || first == ',' || first == '.' || first.is_whitespace()) {
        return true;
    }

    let trimmed = after.trim_start();
    if trimmed.len() == after.len() {
        return false;
    }
    if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return true;
    }
    let mut chars = trimmed.chars();
    let four_digits = (0..4).all(|_| chars.next().is_some_and(|c| c.is_ascii_digit()));
    four_digits && chars.next().is_none_or(char::is_whitespace)
}

/// Living area as `"<n> m²"`, decimal comma normalized to a point.
pub fn extract_size(text: &str) -> Option<String> {
    SIZE_RE
        .captures(text)
        .map(|caps| format!("{} m²", caps[1].replace(',', ".")))
}

/// Postal code + locality (`1190 Wien, 19. Bezirk`) without trailing card noise.
pub fn extract_address_from_text(text: &str) -> Option<String> {
    let found = ADDRESS_RE.find(text)?;
    let address = ADDRESS_TRAILING_SIZE_RE.replace(found.as_str(), "");
    let address = ADDRESS_TRAILING_PRICE_RE.replace(&address, "");
    let address = ADDRESS_TRAILING_ROOMS_RE.replace(&address, "");
    non_empty(normalize_space(&address))
}

/// Split card text into pseudo-lines on bullets, line breaks and wide gaps.
pub fn split_lines(text: &str) -> Vec<String> {
    LINE_SPLIT_RE
        .split(text)
        .map(normalize_space)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Last-resort address guess: a line naming a region, else the first
/// reasonably long line that carries no price/size/fee markers.
pub fn guess_address(lines: &[String]) -> Option<String> {
    if let Some(line) = lines.iter().find(|line| REGION_RE.is_match(line)) {
        return extract_address_from_text(line).or_else(|| Some(line.clone()));
    }

    lines
        .iter()
        .find(|line| line.chars().count() >= MIN_ADDRESS_LENGTH && !METADATA_RE.is_match(line))
        .cloned()
}

/// Strip location, size, price, room count, amenity and agency noise from an
/// anchor's text so only the advertised title remains.
pub fn clean_listing_name(name: &str) -> String {
    let name = TITLE_DISTRICT_RE.replace_all(name, "");
    let name = TITLE_SIZE_RE.replace_all(&name, "");
    let name = TITLE_PRICE_RE.replace_all(&name, "");
    let name = TITLE_ROOMS_RE.replace_all(&name, "");
    let name = TITLE_AMENITY_RE.replace_all(&name, "");
    let name = TITLE_COMPANY_RE.replace_all(&name, "");
    let name = TITLE_LEGAL_SUFFIX_RE.replace_all(&name, "");
    let name = TITLE_STREET_RE.replace_all(&name, "");
    let name = normalize_space(&name);
    TITLE_EDGE_PUNCT_RE.replace_all(&name, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_query_parameter() {
        assert_eq!(
            extract_id_from_href("/iad/object?adId=987654321&x=1").as_deref(),
            Some("987654321")
        );
    }

    #[test]
    fn id_from_trailing_path_segment() {
        assert_eq!(
            extract_id_from_href("/iad/immobilien/d/mietwohnungen/wien/wohnung-1234567/").as_deref(),
            None
        );
        assert_eq!(
            extract_id_from_href("/iad/immobilien/d/mietwohnungen/wien/wohnung/1234567/").as_deref(),
            Some("1234567")
        );
        assert_eq!(extract_id_from_href("/iad/immobilien/d/x/12345"), None);
    }

    #[test]
    fn price_stops_before_postal_code() {
        assert_eq!(
            extract_price("€ 1.735 1190 Wien, 19. Bezirk").as_deref(),
            Some("€ 1.735")
        );
    }

    #[test]
    fn price_keeps_decimal_part() {
        assert_eq!(
            extract_price("Gesamtmiete € 1.234,50 inkl.").as_deref(),
            Some("€ 1.234,50")
        );
    }

    #[test]
    fn price_at_end_of_text() {
        assert_eq!(extract_price("Miete €850").as_deref(), Some("€ 850"));
    }

    #[test]
    fn price_suffix_fallback() {
        assert_eq!(extract_price("Miete 950 € monatlich").as_deref(), Some("950 €"));
    }

    #[test]
    fn price_requires_digits() {
        assert_eq!(extract_price("Preis auf Anfrage €"), None);
    }

    #[test]
    fn size_normalizes_decimal_comma() {
        assert_eq!(extract_size("Wohnfläche 54,5 m² Balkon").as_deref(), Some("54.5 m²"));
        assert_eq!(extract_size("64m²").as_deref(), Some("64 m²"));
        assert_eq!(extract_size("3 Zimmer"), None);
    }

    #[test]
    fn price_and_size_are_independent() {
        let text = "64 m² 3 Zimmer";
        assert_eq!(extract_price(text), None);
        assert_eq!(extract_size(text).as_deref(), Some("64 m²"));

        let text = "€ 990 Altbau";
        assert_eq!(extract_price(text).as_deref(), Some("€ 990"));
        assert_eq!(extract_size(text), None);
    }

    #[test]
    fn address_trims_trailing_noise() {
        assert_eq!(
            extract_address_from_text("Top Lage 1050 Wien, 5. Bezirk 45 m² € 900").as_deref(),
            Some("1050 Wien, 5. Bezirk")
        );
        assert_eq!(
            extract_address_from_text("4020 Linz, Urfahr").as_deref(),
            Some("4020 Linz, Urfahr")
        );
        assert_eq!(extract_address_from_text("keine Adresse"), None);
    }

    #[test]
    fn guess_prefers_region_lines() {
        let lines = vec![
            "Provisionsfrei".to_string(),
            "Graz Zentrum, Steiermark".to_string(),
        ];
        assert_eq!(guess_address(&lines).as_deref(), Some("Graz Zentrum, Steiermark"));
    }

    #[test]
    fn guess_skips_metadata_lines() {
        let lines = vec![
            "€ 700".to_string(),
            "Kaution 3 Monate".to_string(),
            "Hauptplatz 3, Leoben".to_string(),
        ];
        assert_eq!(guess_address(&lines).as_deref(), Some("Hauptplatz 3, Leoben"));
        assert_eq!(guess_address(&["kurz".to_string()]), None);
    }

    #[test]
    fn split_lines_on_bullets_and_gaps() {
        assert_eq!(
            split_lines("Neubau • Erstbezug\nWien   Favoriten"),
            vec!["Neubau", "Erstbezug", "Wien", "Favoriten"]
        );
    }

    #[test]
    fn title_cleanup_matches_card_example() {
        assert_eq!(
            clean_listing_name("Sonnige 3-Zimmer Wohnung 1190 Wien, 19. Bezirk 64 m² € 1.735"),
            "Sonnige 3-Zimmer Wohnung"
        );
    }

    #[test]
    fn title_cleanup_drops_rooms_amenity_and_agency() {
        assert_eq!(clean_listing_name("Helle Wohnung 2 Zimmer Balkon"), "Helle Wohnung");
        assert_eq!(clean_listing_name("Loft mit Flair EHL Immobilien"), "Loft mit Flair");
        assert_eq!(clean_listing_name("Dachgeschoss Privat"), "Dachgeschoss");
        assert_eq!(
            clean_listing_name("Altbau Traum, Schönbrunner Straße"),
            "Altbau Traum, Schönbrunner Straße"
        );
        assert_eq!(clean_listing_name("Altbau Traum, Gumpendorferstraße"), "Altbau Traum");
    }
}
