//! Weighted keyword rules.
//!
//! Each rule sums the weights of the keywords found in the message, subtracts
//! matched exclusions, and is penalized when an entity it depends on is
//! missing. The result is scaled by the rule's priority. The highest score
//! wins; on equal scores the rule listed first wins, so the table order is the
//! tie-break order.

use super::{
    IntentLabel,
    extract::{contains_term, normalize},
};
use crate::{context::Context, tasks::session_keys};

/// Entity a rule depends on.
#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    Image,
    ContextKey(&'static str),
}

#[derive(Debug)]
pub struct IntentRule {
    pub intent: IntentLabel,
    pub keywords: &'static [(&'static str, f32)],
    pub exclusions: &'static [(&'static str, f32)],
    pub requires: Option<Requirement>,
    /// Subtracted when `requires` is not satisfied
    pub penalty: f32,
    /// Added when an image is attached
    pub image_bonus: f32,
    pub priority: f32,
    /// The rule only applies to replies of at most this many words
    pub max_words: Option<usize>,
}

pub static RULES: &[IntentRule] = &[
    IntentRule {
        intent: IntentLabel::Restart,
        keywords: &[
            ("start over", 2.0),
            ("restart", 2.0),
            ("reset", 1.5),
            ("begin again", 2.0),
            ("new diagnosis", 1.5),
            ("another plant", 1.0),
        ],
        exclusions: &[],
        requires: None,
        penalty: 0.0,
        image_bonus: 0.0,
        priority: 1.6,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Decline,
        keywords: &[
            ("no", 1.0),
            ("nope", 1.0),
            ("no thanks", 1.5),
            ("not now", 1.5),
            ("not interested", 1.5),
            ("nothing", 1.0),
            ("nothing else", 1.5),
            ("that s all", 1.5),
            ("thats all", 1.5),
            ("done", 0.8),
            ("skip", 1.0),
            ("bye", 1.5),
            ("goodbye", 1.5),
            ("stop", 1.0),
        ],
        exclusions: &[("yes", 1.0), ("but", 0.5)],
        requires: None,
        penalty: 0.0,
        image_bonus: 0.0,
        priority: 1.5,
        max_words: Some(4),
    },
    IntentRule {
        intent: IntentLabel::Insurance,
        keywords: &[
            ("insurance", 2.0),
            ("insure", 2.0),
            ("insured", 1.5),
            ("pmfby", 2.0),
            ("fasal bima", 2.0),
            ("bima", 1.5),
            ("premium", 1.5),
            ("policy", 1.0),
            ("certificate", 1.0),
            ("coverage", 1.0),
            ("claim", 1.0),
            ("insurer", 1.0),
        ],
        exclusions: &[],
        requires: None,
        penalty: 0.0,
        image_bonus: 0.0,
        priority: 1.4,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Vendor,
        keywords: &[
            ("vendor", 2.0),
            ("vendors", 2.0),
            ("dealer", 1.5),
            ("dealers", 1.5),
            ("supplier", 1.5),
            ("suppliers", 1.5),
            ("shop", 1.5),
            ("store", 1.0),
            ("seller", 1.5),
            ("where can i get", 1.5),
            ("where to buy", 2.0),
            ("where can i buy", 2.0),
            ("buy", 1.0),
            ("purchase", 1.0),
            ("near me", 1.0),
            ("in stock", 1.0),
        ],
        exclusions: &[
            ("insurance", 3.0),
            ("premium", 2.0),
            ("policy", 2.0),
            ("certificate", 2.0),
            ("scheme", 1.0),
        ],
        requires: None,
        penalty: 0.0,
        image_bonus: 0.0,
        priority: 1.3,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Order,
        keywords: &[
            ("order", 1.5),
            ("place order", 2.0),
            ("place the order", 2.0),
            ("book", 1.5),
            ("select", 1.0),
            ("choose", 1.0),
            ("option", 1.0),
            ("first", 0.8),
            ("second", 0.8),
            ("third", 0.8),
        ],
        exclusions: &[("insurance", 2.0)],
        requires: Some(Requirement::ContextKey(session_keys::VENDOR_OPTIONS)),
        penalty: 1.0,
        image_bonus: 0.0,
        priority: 1.3,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Treatment,
        keywords: &[
            ("treatment", 2.0),
            ("treat", 1.5),
            ("cure", 1.5),
            ("remedy", 1.5),
            ("medicine", 1.5),
            ("pesticide", 1.0),
            ("fungicide", 1.0),
            ("spray", 1.0),
            ("dosage", 1.5),
            ("dose", 1.0),
            ("control", 0.8),
            ("spread", 1.0),
            ("spreading", 1.0),
            ("prevent", 1.0),
            ("how to fix", 1.5),
            ("what should i do", 1.0),
        ],
        exclusions: &[("insurance", 2.0), ("buy", 1.0), ("vendor", 1.5)],
        requires: Some(Requirement::ContextKey(session_keys::CLASSIFICATION)),
        penalty: 0.5,
        image_bonus: 0.0,
        priority: 1.2,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Diagnose,
        keywords: &[
            ("diagnose", 2.0),
            ("diagnosis", 2.0),
            ("disease", 1.5),
            ("identify", 1.5),
            ("what is wrong", 1.5),
            ("whats wrong", 1.5),
            ("infected", 1.5),
            ("infection", 1.5),
            ("spots", 1.0),
            ("yellow", 0.8),
            ("wilting", 1.0),
            ("sick", 1.0),
            ("leaf", 0.5),
            ("leaves", 0.5),
            ("photo", 0.8),
            ("image", 0.8),
            ("picture", 0.8),
        ],
        exclusions: &[("insurance", 2.0)],
        requires: Some(Requirement::Image),
        penalty: 0.5,
        image_bonus: 1.5,
        priority: 1.1,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Affirm,
        keywords: &[
            ("yes", 1.5),
            ("yeah", 1.5),
            ("yep", 1.5),
            ("sure", 1.0),
            ("ok", 1.0),
            ("okay", 1.0),
            ("confirm", 1.5),
            ("go ahead", 1.5),
            ("please do", 1.0),
            ("proceed", 1.0),
            ("correct", 1.0),
        ],
        exclusions: &[("no", 1.0), ("not", 1.0)],
        requires: None,
        penalty: 0.0,
        image_bonus: 0.0,
        priority: 1.0,
        max_words: None,
    },
    IntentRule {
        intent: IntentLabel::Greeting,
        keywords: &[
            ("hi", 1.0),
            ("hello", 1.0),
            ("hey", 1.0),
            ("namaste", 1.0),
            ("good morning", 1.0),
            ("good evening", 1.0),
        ],
        exclusions: &[],
        requires: None,
        penalty: 0.0,
        image_bonus: 0.0,
        priority: 0.8,
        max_words: None,
    },
];

/// Score of one rule against one message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleScore {
    pub intent: IntentLabel,
    pub score: f32,
}

impl IntentRule {
    pub fn score(&self, normalized: &str, has_image: bool, context: &Context) -> f32 {
        if let Some(max_words) = self.max_words {
            if normalized.split_whitespace().count() > max_words {
                return 0.0;
            }
        }
        let matched: f32 = sum_matches(normalized, self.keywords);
        let bonus = if has_image { self.image_bonus } else { 0.0 };
        if matched + bonus <= 0.0 {
            return 0.0;
        }

        let mut weight = matched + bonus - sum_matches(normalized, self.exclusions);
        let satisfied = match self.requires {
            None => true,
            Some(Requirement::Image) => has_image,
            Some(Requirement::ContextKey(key)) => context.contains(key),
        };
        if !satisfied {
            weight -= self.penalty;
        }
        (weight * self.priority).max(0.0)
    }
}

fn sum_matches(normalized: &str, terms: &[(&str, f32)]) -> f32 {
    terms
        .iter()
        .filter(|(term, _)| contains_term(normalized, term))
        .map(|(_, weight)| weight)
        .sum()
}

/// Scores of every rule, in table order.
pub fn score_all(text: &str, has_image: bool, context: &Context) -> Vec<RuleScore> {
    let normalized = normalize(text);
    RULES
        .iter()
        .map(|rule| RuleScore {
            intent: rule.intent,
            score: rule.score(&normalized, has_image, context),
        })
        .collect()
}

/// Winning rule, if any scored above zero.
pub fn best(scores: &[RuleScore]) -> Option<RuleScore> {
    scores
        .iter()
        .filter(|s| s.score > 0.0)
        .fold(None, |best: Option<RuleScore>, s| match best {
            Some(b) if b.score >= s.score => Some(b),
            _ => Some(*s),
        })
}

/// Map a rule weight onto (0, 1).
pub fn confidence(weight: f32) -> f32 {
    if weight <= 0.0 {
        0.0
    } else {
        weight / (weight + 1.0)
    }
}
