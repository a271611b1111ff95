//! Entity extraction from free text: crop, farm area, region, applicant name
//! and the product/location of a vendor search.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Hectares per acre.
pub const ACRE_IN_HECTARES: f64 = 0.4047;

const CROPS: &[(&str, &str)] = &[
    ("wheat", "wheat"),
    ("rice", "rice"),
    ("paddy", "rice"),
    ("maize", "maize"),
    ("corn", "maize"),
    ("cotton", "cotton"),
    ("sugarcane", "sugarcane"),
    ("soybean", "soybean"),
    ("soyabean", "soybean"),
    ("groundnut", "groundnut"),
    ("peanut", "groundnut"),
    ("mustard", "mustard"),
    ("bajra", "bajra"),
    ("millet", "millet"),
    ("jowar", "jowar"),
    ("sorghum", "jowar"),
    ("barley", "barley"),
    ("gram", "gram"),
    ("chickpea", "gram"),
    ("tur", "tur"),
    ("pigeon pea", "tur"),
    ("potato", "potato"),
    ("tomato", "tomato"),
    ("onion", "onion"),
    ("chilli", "chilli"),
    ("banana", "banana"),
    ("apple", "apple"),
    ("grape", "grape"),
    ("mango", "mango"),
    ("tea", "tea"),
    ("coffee", "coffee"),
];

const REGIONS: &[&str] = &[
    "Andhra Pradesh",
    "Arunachal Pradesh",
    "Assam",
    "Bihar",
    "Chhattisgarh",
    "Goa",
    "Gujarat",
    "Haryana",
    "Himachal Pradesh",
    "Jharkhand",
    "Karnataka",
    "Kerala",
    "Madhya Pradesh",
    "Maharashtra",
    "Manipur",
    "Meghalaya",
    "Mizoram",
    "Nagaland",
    "Odisha",
    "Punjab",
    "Rajasthan",
    "Sikkim",
    "Tamil Nadu",
    "Telangana",
    "Tripura",
    "Uttar Pradesh",
    "Uttarakhand",
    "West Bengal",
    "Delhi",
    "Jammu and Kashmir",
    "Ladakh",
    "Puducherry",
    "Chandigarh",
];

static AREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*-?\s*(hectares?|ha|acres?)\b").expect("valid area regex")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:my name is|name is|name\s*:|i am|i'm)\s+([a-z][a-z.'-]*(?:\s+[a-z][a-z.'-]*){0,3})")
        .expect("valid name regex")
});

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:near|in|at|around)\s+([a-z][a-z]+(?:\s+[a-z][a-z]+)?)").expect("valid location regex")
});

static PRODUCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:buy|get|order|purchase|need|find)\s+(?:some\s+|the\s+|a\s+)?([a-z0-9][a-z0-9 -]{2,40}?)(?:\s+(?:near|in|at|from|for)\b|[.,!?]|$)")
        .expect("valid product regex")
});

/// Words after "I am" that are not names.
const NOT_NAMES: &[&str] = &[
    "a", "an", "the", "not", "looking", "interested", "from", "in", "trying", "going", "farming",
    "growing", "worried", "ready", "done", "fine", "good", "here", "unable",
];

/// Words that read like a place after "in"/"at" but are not one.
const NOT_LOCATIONS: &[&str] = &[
    "my", "me", "us", "you", "here", "there", "the", "a", "an", "this", "that", "stock", "store",
    "insurance", "time", "hectare", "hectares", "acre", "acres",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub crop: Option<String>,
    pub area_hectare: Option<f64>,
    pub region: Option<String>,
    pub applicant_name: Option<String>,
}

impl ExtractedEntities {
    pub fn from_text(text: &str) -> Self {
        Self {
            crop: extract_crop(text),
            area_hectare: extract_area_hectares(text),
            region: extract_region(text),
            applicant_name: extract_applicant_name(text),
        }
    }
}

/// Lower-case the text and collapse everything but letters and digits into
/// single spaces, padded so that `" term "` lookups match whole words.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_lowercase());
        out.push(' ');
    }
    out
}

/// Whole-word/phrase match against text produced by [`normalize`].
pub fn contains_term(normalized: &str, term: &str) -> bool {
    normalized.contains(&format!(" {} ", term))
}

pub fn extract_crop(text: &str) -> Option<String> {
    let normalized = normalize(text);
    CROPS.iter().find_map(|(word, canonical)| {
        let matched = contains_term(&normalized, word)
            || contains_term(&normalized, &format!("{word}s"))
            || contains_term(&normalized, &format!("{word}es"));
        matched.then(|| canonical.to_string())
    })
}

pub fn extract_area_hectares(text: &str) -> Option<f64> {
    let caps = AREA_RE.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let hectares = if unit.starts_with("acre") {
        value * ACRE_IN_HECTARES
    } else {
        value
    };
    // four decimals is enough for premium arithmetic
    Some((hectares * 10_000.0).round() / 10_000.0)
}

pub fn extract_region(text: &str) -> Option<String> {
    let normalized = normalize(text);
    REGIONS
        .iter()
        .find(|region| contains_term(&normalized, &region.to_lowercase()))
        .map(|region| region.to_string())
}

pub fn extract_applicant_name(text: &str) -> Option<String> {
    let caps = NAME_RE.captures(text)?;
    let candidate = caps.get(1)?.as_str().trim();
    let first = candidate.split_whitespace().next()?.to_lowercase();
    if NOT_NAMES.contains(&first.as_str()) || extract_crop(&first).is_some() {
        return None;
    }
    // stop at words that obviously start a new clause
    let name: Vec<String> = candidate
        .split_whitespace()
        .take_while(|w| !matches!(w.to_lowercase().as_str(), "and" | "from" | "with" | "for"))
        .map(capitalize)
        .collect();
    (!name.is_empty()).then(|| name.join(" "))
}

/// Place mentioned in a vendor request: a known region first, then "near X".
pub fn extract_location(text: &str) -> Option<String> {
    if let Some(region) = extract_region(text) {
        return Some(region);
    }
    LOCATION_RE.captures_iter(text).find_map(|caps| {
        let place = caps.get(1)?.as_str().trim();
        let first = place.split_whitespace().next()?.to_lowercase();
        if NOT_LOCATIONS.contains(&first.as_str()) {
            return None;
        }
        Some(place.split_whitespace().map(capitalize).collect::<Vec<_>>().join(" "))
    })
}

pub fn extract_product(text: &str) -> Option<String> {
    let caps = PRODUCT_RE.captures(text.trim())?;
    let product = caps.get(1)?.as_str().trim();
    let normalized = normalize(product);
    if ["insurance", "vendor", "vendors", "help", "it", "them", "this", "that"]
        .iter()
        .any(|w| normalized.trim() == *w)
    {
        return None;
    }
    Some(product.to_string())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
