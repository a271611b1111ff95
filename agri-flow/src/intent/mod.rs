//! Intent Classifier.
//!
//! Weighted rules pick the coarse intent. Insurance requests are further
//! resolved into a backend action, by the optional language-model refiner
//! when one is configured and answers in time with valid output, otherwise
//! by the deterministic phrase tiers in [`insurance`].

pub mod extract;
pub mod insurance;
pub mod refiner;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    context::{Context, Transcript},
    error::FlowError,
    task::TurnInput,
};

pub use extract::ExtractedEntities;
pub use insurance::{ActionSignals, InsuranceAction};
pub use refiner::{IntentRefiner, RefinedInsuranceIntent, RefinementOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Diagnose,
    Treatment,
    Insurance,
    Vendor,
    Order,
    Affirm,
    Decline,
    Restart,
    Greeting,
    General,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diagnose => "diagnose",
            Self::Treatment => "treatment",
            Self::Insurance => "insurance",
            Self::Vendor => "vendor",
            Self::Order => "order",
            Self::Affirm => "affirm",
            Self::Decline => "decline",
            Self::Restart => "restart",
            Self::Greeting => "greeting",
            Self::General => "general",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Rules,
    Refined,
    Fallback,
}

/// Names of the boolean sub-intent flags.
pub mod sub_intents {
    pub const WANTS_INSURANCE: &str = "wants_insurance";
    pub const WANTS_PURCHASE: &str = "wants_purchase";
    pub const WANTS_PREMIUM: &str = "wants_premium";
    pub const WANTS_COMPANIES: &str = "wants_companies";
    pub const WANTS_COVERAGE: &str = "wants_coverage";
    pub const WANTS_VENDOR: &str = "wants_vendor";
    pub const WANTS_ORDER: &str = "wants_order";
    pub const WANTS_TREATMENT: &str = "wants_treatment";
    pub const WANTS_DIAGNOSIS: &str = "wants_diagnosis";
    pub const HAS_IMAGE: &str = "has_image";
    pub const AFFIRM: &str = "affirm";
    pub const DECLINE: &str = "decline";
    pub const RESTART: &str = "restart";
}

/// Structured, confidence-scored reading of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: IntentLabel,
    pub confidence: f32,
    pub sub_intents: BTreeMap<String, bool>,
    /// Diagnostics only, never used for routing
    pub reasoning: String,
    pub source: IntentSource,
    /// Resolved backend action for insurance requests
    pub insurance_action: Option<InsuranceAction>,
}

impl IntentResult {
    pub fn flag(&self, name: &str) -> bool {
        self.sub_intents.get(name).copied().unwrap_or(false)
    }

    pub fn insurance_action(&self) -> Option<InsuranceAction> {
        self.insurance_action
    }

    pub fn is(&self, label: IntentLabel) -> bool {
        self.intent == label
    }
}

pub struct IntentClassifier {
    refiner: Option<Arc<dyn IntentRefiner>>,
    timeout: Duration,
}

impl IntentClassifier {
    /// Rules and deterministic fallback only.
    pub fn rules_only() -> Self {
        Self {
            refiner: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn new(refiner: Option<Arc<dyn IntentRefiner>>, timeout: Duration) -> Self {
        Self { refiner, timeout }
    }

    pub fn has_refiner(&self) -> bool {
        self.refiner.is_some()
    }

    /// Classify a message. Never fails: any refinement problem degrades to
    /// the deterministic fallback.
    pub async fn classify(
        &self,
        turn: &TurnInput,
        context: &Context,
        history: &Transcript,
    ) -> IntentResult {
        let mut result = classify_rules(turn, context);
        if result.intent != IntentLabel::Insurance {
            return result;
        }

        let text = turn.combined_text();
        if let Some(refiner) = &self.refiner {
            match self.refine(refiner.as_ref(), &text, context, history).await {
                Ok(refined) => {
                    debug!(
                        action = %refined.action,
                        confidence = refined.confidence,
                        "Insurance intent refined"
                    );
                    result.insurance_action = Some(refined.action);
                    result.confidence = refined.confidence;
                    result.reasoning = refined.reasoning;
                    result.source = IntentSource::Refined;
                    set_action_flags(&mut result.sub_intents, refined.action);
                    return result;
                }
                Err(e) => {
                    warn!(error = %e, "Intent refinement failed, using keyword fallback");
                }
            }
        }

        apply_fallback(&mut result, &text);
        result
    }

    async fn refine(
        &self,
        model: &dyn IntentRefiner,
        text: &str,
        context: &Context,
        history: &Transcript,
    ) -> Result<RefinedInsuranceIntent, FlowError> {
        let prompt = refiner::build_prompt(text, history.last_messages(6), &known_facts(context));
        let raw = tokio::time::timeout(self.timeout, model.complete(&prompt))
            .await
            .map_err(|_| FlowError::IntentAmbiguous("refinement timed out".to_string()))?
            .map_err(|e| FlowError::IntentAmbiguous(format!("refiner error: {e}")))?;

        match refiner::parse_refinement(&raw) {
            RefinementOutcome::Validated(refined) => Ok(refined),
            RefinementOutcome::ParseFailure(reason) => Err(FlowError::IntentAmbiguous(reason)),
        }
    }
}

/// Rule-based pass only: coarse intent and flags, no insurance action yet.
pub fn classify_rules(turn: &TurnInput, context: &Context) -> IntentResult {
    let text = turn.combined_text();
    let has_image = turn.has_image();
    let scores = rules::score_all(&text, has_image, context);
    let best = rules::best(&scores);

    let scored = |label: IntentLabel| {
        scores
            .iter()
            .any(|s| s.intent == label && s.score > 0.0)
    };
    let mut flags = BTreeMap::new();
    flags.insert(sub_intents::WANTS_INSURANCE.to_string(), scored(IntentLabel::Insurance));
    flags.insert(sub_intents::WANTS_VENDOR.to_string(), scored(IntentLabel::Vendor));
    flags.insert(sub_intents::WANTS_ORDER.to_string(), scored(IntentLabel::Order));
    flags.insert(sub_intents::WANTS_TREATMENT.to_string(), scored(IntentLabel::Treatment));
    flags.insert(sub_intents::WANTS_DIAGNOSIS.to_string(), scored(IntentLabel::Diagnose));
    flags.insert(sub_intents::AFFIRM.to_string(), scored(IntentLabel::Affirm));
    flags.insert(sub_intents::DECLINE.to_string(), scored(IntentLabel::Decline));
    flags.insert(sub_intents::RESTART.to_string(), scored(IntentLabel::Restart));
    flags.insert(sub_intents::HAS_IMAGE.to_string(), has_image);

    let signals = ActionSignals::from_text(&text);
    flags.insert(sub_intents::WANTS_PURCHASE.to_string(), signals.purchase);
    flags.insert(sub_intents::WANTS_PREMIUM.to_string(), signals.cost);
    flags.insert(sub_intents::WANTS_COMPANIES.to_string(), signals.company);
    flags.insert(sub_intents::WANTS_COVERAGE.to_string(), signals.coverage);

    match best {
        Some(best) => IntentResult {
            intent: best.intent,
            confidence: rules::confidence(best.score),
            sub_intents: flags,
            reasoning: format!("rule '{}' scored {:.2}", best.intent, best.score),
            source: IntentSource::Rules,
            insurance_action: None,
        },
        None => IntentResult {
            intent: IntentLabel::General,
            confidence: 0.0,
            sub_intents: flags,
            reasoning: "no rule matched".to_string(),
            source: IntentSource::Rules,
            insurance_action: None,
        },
    }
}

fn apply_fallback(result: &mut IntentResult, text: &str) {
    let action = insurance::fallback_action(text);
    result.insurance_action = Some(action);
    result.source = IntentSource::Fallback;
    result.reasoning = format!("keyword fallback chose {action}");
    set_action_flags(&mut result.sub_intents, action);
}

/// Keep the action flags consistent with the chosen action.
fn set_action_flags(flags: &mut BTreeMap<String, bool>, action: InsuranceAction) {
    let flag = match action {
        InsuranceAction::GenerateCertificate => sub_intents::WANTS_PURCHASE,
        InsuranceAction::CalculatePremium => sub_intents::WANTS_PREMIUM,
        InsuranceAction::GetCompanies => sub_intents::WANTS_COMPANIES,
        InsuranceAction::Recommend => sub_intents::WANTS_COVERAGE,
    };
    flags.insert(flag.to_string(), true);
}

fn known_facts(context: &Context) -> String {
    let Some(insurance) = context.get_value(crate::tasks::session_keys::INSURANCE) else {
        return String::new();
    };
    ["crop", "area_hectare", "region", "premium"]
        .iter()
        .filter_map(|key| insurance.get(*key).map(|v| format!("{key}={v}")))
        .collect::<Vec<_>>()
        .join(", ")
}
