use crate::parser::fields::normalize_space;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static JSONLD_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Map absolute listing link -> title from embedded `ItemList` blocks.
///
/// A block that fails to parse is skipped on its own; the rest still count.
pub fn extract_jsonld_titles(document: &Html, base: &Url) -> HashMap<String, String> {
    let mut titles = HashMap::new();

    for script in document.select(&JSONLD_SELECTOR) {
        let raw = script.text().collect::<String>();
        let data: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!("Failed to parse JSON-LD block: {}", e);
                continue;
            }
        };

        let payloads = match data {
            Value::Array(items) => items,
            other => vec![other],
        };

        for payload in payloads.iter().filter(|p| is_item_list(p)) {
            let Some(entries) = payload.get("itemListElement").and_then(Value::as_array) else {
                continue;
            };
            for entry in entries.iter().filter(|e| e.is_object()) {
                let nested = entry.get("item").filter(|i| i.is_object());

                let url = str_field(entry, "url")
                    .or_else(|| nested.and_then(|i| str_field(i, "url")))
                    .or_else(|| nested.and_then(|i| str_field(i, "@id")));
                let name = str_field(entry, "name").or_else(|| nested.and_then(|i| str_field(i, "name")));

                if let Some(url) = url {
                    if let Ok(full) = base.join(url) {
                        titles.insert(full.to_string(), normalize_space(name.unwrap_or_default()));
                    }
                }
            }
        }
    }

    titles
}

fn is_item_list(payload: &Value) -> bool {
    payload.get("@type").and_then(Value::as_str) == Some("ItemList")
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
