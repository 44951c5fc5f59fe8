//! Canonical keyword form for tags and city names.
//!
//! Scraped tags arrive in any case, with HTML entities, accents, typographic
//! dashes and the odd non-Latin script. Everything goes through the same fold
//! before an ontology lookup:
//!
//! 1. HTML entity decode (`&amp;` → `&`)
//! 2. lower-case + Unicode compatibility decomposition (NFKD), combining marks dropped
//! 3. anything that is not a letter or digit becomes a space
//! 4. whitespace collapsed and trimmed
//!
//! Non-Latin letters are kept (lower-cased), so multi-language tags still get a
//! stable key. The fold is idempotent: `normalize_tag(normalize_tag(x)) == normalize_tag(x)`.

use once_cell::sync::OnceCell;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

const CITY_SUFFIXES: [&str; 5] = [" city", " metropolitan", " metro", " province", " region"];

/// Normalize a raw tag. May return an empty string ("no signal").
pub fn normalize_tag(raw: &str) -> String {
    // 1) HTML entity decode
    let decoded = html_escape::decode_html_entities(raw);

    // 2) Fold case and accents. Lower-casing runs again after NFKD because
    //    compatibility forms can decompose into capitals (e.g. "㎒" → "MHz").
    let folded = decoded
        .to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    // 3) Separators / punctuation → space
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(spaced.trim(), " ").into_owned()
}

/// Normalized keyword, or `None` when nothing usable is left.
pub fn normalize_signal(raw: &str) -> Option<String> {
    let k = normalize_tag(raw);
    if k.is_empty() {
        None
    } else {
        Some(k)
    }
}

/// Normalize a city name for matching: tag fold plus common administrative suffixes
/// (" city", " metro", ...) stripped once each.
pub fn normalize_city_name(name: &str) -> String {
    let mut out = normalize_tag(name);
    for suffix in CITY_SUFFIXES {
        if let Some(stripped) = out.strip_suffix(suffix) {
            out = stripped.trim_end().to_string();
        }
    }
    out
}
