use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::types::{ClassificationRecord, InsuranceContext, session_keys};
use crate::{
    context::Context,
    intent::extract::{self, contains_term, normalize},
    task::TaskInput,
    tools::{ImageInput, VendorOffer},
};

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\b").expect("valid number regex"));

const ORDINALS: &[&str] = &["first", "second", "third", "fourth", "fifth"];

/// Context update holding a single key.
pub fn update_with(key: &str, value: impl Serialize) -> Context {
    let mut update = Context::new();
    update.set(key, value);
    update
}

pub fn insurance_context(context: &Context) -> InsuranceContext {
    context.get(session_keys::INSURANCE).unwrap_or_default()
}

pub fn classification(context: &Context) -> Option<ClassificationRecord> {
    context.get(session_keys::CLASSIFICATION)
}

/// Crop named in this turn, else the one remembered from earlier turns.
pub fn known_crop(input: &TaskInput<'_>) -> Option<String> {
    extract::extract_crop(&input.turn.combined_text())
        .or_else(|| input.context().get(session_keys::CROP))
        .or_else(|| insurance_context(input.context()).crop)
        .or_else(|| classification(input.context()).and_then(|c| c.crop))
}

/// Image of this turn, else the one waiting to be classified.
pub fn image_to_classify(input: &TaskInput<'_>) -> Option<ImageInput> {
    if let Some(image) = &input.turn.image {
        return Some(image.clone());
    }
    let pending: ImageInput = input.context().get(session_keys::PENDING_IMAGE)?;
    let already_classified = classification(input.context())
        .is_some_and(|record| record.image_digest == pending.digest());
    (!already_classified).then_some(pending)
}

/// Pick a vendor by number, ordinal word or name.
pub fn parse_selection(text: &str, options: &[VendorOffer]) -> Option<usize> {
    if let Some(caps) = NUMBER_RE.captures(text) {
        if let Ok(n) = caps[1].parse::<usize>() {
            if (1..=options.len()).contains(&n) {
                return Some(n - 1);
            }
        }
    }

    let normalized = normalize(text);
    if let Some(index) = ORDINALS
        .iter()
        .position(|word| contains_term(&normalized, word))
        .filter(|index| *index < options.len())
    {
        return Some(index);
    }

    options.iter().position(|offer| {
        let name = normalize(&offer.vendor);
        let name = name.trim();
        !name.is_empty() && contains_term(&normalized, name)
    })
}

pub fn format_price(price: f64) -> String {
    format!("Rs {price:.2}")
}

pub fn percent(confidence: f32) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// "a", "a and b", "a, b and c"
pub fn join_words(words: &[&str]) -> String {
    match words {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
