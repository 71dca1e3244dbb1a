//! Text normalization for comparison keys
//!
//! Every key the engine compares or hashes goes through [`normalize`]:
//! - lowercase and trim
//! - Unicode NFD decomposition with combining marks removed ("Genève" -> "geneve")
//! - every run of non-alphanumeric characters becomes a single space
//! - whitespace collapsed
//!
//! The function is pure and idempotent.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Legal-form tokens dropped from company keys
const LEGAL_SUFFIXES: &[&str] = &[
    "ag", "bv", "co", "corp", "corporation", "gmbh", "inc", "incorporated", "kg", "llc", "llp",
    "lp", "ltd", "limited", "nv", "plc", "pte", "pty", "sa", "sagl", "sarl", "sas", "se",
];

/// Country names (in the national languages) mapped to the canonical country label
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("switzerland", "Switzerland"),
    ("suisse", "Switzerland"),
    ("schweiz", "Switzerland"),
    ("svizzera", "Switzerland"),
    ("svizra", "Switzerland"),
];

/// City mentions mapped to canton codes
const CITY_CANTONS: &[(&str, &str)] = &[
    ("zurich", "ZH"),
    ("geneva", "GE"),
    ("geneve", "GE"),
    ("bern", "BE"),
    ("basel", "BS"),
    ("lausanne", "VD"),
    ("lugano", "TI"),
    ("lucerne", "LU"),
    ("luzern", "LU"),
    ("zug", "ZG"),
    ("st gallen", "SG"),
];

/// Normalize free text into a comparison key
///
/// # Examples
///
/// ```
/// use jobmerge::core::normalize::normalize;
///
/// assert_eq!(normalize("  Data Scientist (Genève) "), "data scientist geneve");
/// assert_eq!(normalize("Procter & Gamble"), "procter gamble");
/// assert_eq!(normalize(""), "");
/// ```
pub fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase();

    let folded: String = lowered
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize optional text, treating `None` as empty
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Normalize a job title
pub fn normalize_title(title: &str) -> String {
    normalize(title)
}

/// Company comparison key: the normalized name without legal-form tokens
///
/// Legal forms are kept when stripping them would leave nothing, so a company
/// literally called "AG" still has a non-empty key.
///
/// ```
/// use jobmerge::core::normalize::company_key;
///
/// assert_eq!(company_key("Google, Inc."), "google");
/// assert_eq!(company_key("Google Switzerland GmbH"), "google switzerland");
/// assert_eq!(company_key("Crédit Suisse"), "credit suisse");
/// ```
pub fn company_key(name: &str) -> String {
    let normalized = normalize(name);
    let kept: Vec<&str> = normalized
        .split(' ')
        .filter(|token| !token.is_empty() && !LEGAL_SUFFIXES.contains(token))
        .collect();

    if kept.is_empty() {
        normalized
    } else {
        kept.join(" ")
    }
}

/// Lower-cased, trimmed canton code
pub fn canton_code(canton: Option<&str>) -> String {
    canton.map(|c| c.trim().to_lowercase()).unwrap_or_default()
}

/// Collapse a free-text location to its country when a country is named
///
/// Returns the trimmed input unchanged when no known country appears.
pub fn normalize_location(location: Option<&str>) -> String {
    let Some(location) = location else {
        return String::new();
    };
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    for part in trimmed.split(',') {
        let key = normalize(part);
        if let Some((_, country)) = COUNTRY_ALIASES.iter().find(|(alias, _)| *alias == key) {
            return (*country).to_string();
        }
    }

    trimmed.to_string()
}

/// Ensure a URL carries a scheme, defaulting to https
pub fn normalize_url(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    match url::Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => trimmed.to_string(),
        _ => format!("https://{}", trimmed),
    }
}

/// Infer a canton code from a title or location mentioning a major city
pub fn canton_from_text(text: &str) -> Option<&'static str> {
    let key = format!(" {} ", normalize(text));
    CITY_CANTONS
        .iter()
        .find(|(city, _)| key.contains(&format!(" {} ", city)))
        .map(|(_, canton)| *canton)
}
