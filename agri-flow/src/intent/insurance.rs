use serde::{Deserialize, Serialize};
use std::fmt;

use super::extract::{contains_term, normalize};

/// Actions exposed by the insurance backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceAction {
    CalculatePremium,
    GenerateCertificate,
    GetCompanies,
    Recommend,
}

impl InsuranceAction {
    pub const ALL: [InsuranceAction; 4] = [
        InsuranceAction::CalculatePremium,
        InsuranceAction::GenerateCertificate,
        InsuranceAction::GetCompanies,
        InsuranceAction::Recommend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CalculatePremium => "calculate_premium",
            Self::GenerateCertificate => "generate_certificate",
            Self::GetCompanies => "get_companies",
            Self::Recommend => "recommend",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == value.trim())
    }

    /// Whether the action creates something on the backend.
    pub fn is_side_effecting(&self) -> bool {
        matches!(self, Self::GenerateCertificate)
    }
}

impl fmt::Display for InsuranceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strong purchase signals. Checked first: "apply for insurance with this
/// premium" is a purchase, not a cost question.
const PURCHASE_PHRASES: &[&str] = &[
    "apply",
    "apply for",
    "submit the application",
    "submit my application",
    "buy",
    "purchase",
    "enroll",
    "enrol",
    "register",
    "sign up",
    "subscribe",
    "get insured",
    "issue the certificate",
    "issue my certificate",
    "issue a certificate",
    "issue certificate",
    "generate certificate",
    "generate the certificate",
    "get the certificate",
    "get my certificate",
    "proceed with",
    "go ahead with",
    "take the policy",
];

const COST_PHRASES: &[&str] = &[
    "premium",
    "cost",
    "costs",
    "how much",
    "price",
    "calculate",
    "calculation",
    "quote",
    "estimate",
    "pay",
    "charges",
    "amount",
];

const COMPANY_PHRASES: &[&str] = &[
    "company",
    "companies",
    "insurer",
    "insurers",
    "provider",
    "providers",
    "which insurance",
    "who provides",
    "who offers",
];

const COVERAGE_PHRASES: &[&str] = &[
    "coverage",
    "cover",
    "covered",
    "covers",
    "scheme",
    "schemes",
    "recommend",
    "recommendation",
    "suggest",
    "best plan",
    "which plan",
    "options",
];

/// Which phrase tiers matched, highest tier first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSignals {
    pub purchase: bool,
    pub cost: bool,
    pub company: bool,
    pub coverage: bool,
}

impl ActionSignals {
    pub fn from_text(text: &str) -> Self {
        let normalized = normalize(text);
        let any = |phrases: &[&str]| phrases.iter().any(|p| contains_term(&normalized, p));
        Self {
            purchase: any(PURCHASE_PHRASES),
            cost: any(COST_PHRASES),
            company: any(COMPANY_PHRASES),
            coverage: any(COVERAGE_PHRASES),
        }
    }

    /// purchase > cost inquiry > company inquiry > coverage > premium by default
    pub fn action(&self) -> InsuranceAction {
        if self.purchase {
            InsuranceAction::GenerateCertificate
        } else if self.cost {
            InsuranceAction::CalculatePremium
        } else if self.company {
            InsuranceAction::GetCompanies
        } else if self.coverage {
            InsuranceAction::Recommend
        } else {
            InsuranceAction::CalculatePremium
        }
    }

    pub fn any(&self) -> bool {
        self.purchase || self.cost || self.company || self.coverage
    }
}

/// Deterministic insurance action for a message.
pub fn fallback_action(text: &str) -> InsuranceAction {
    ActionSignals::from_text(text).action()
}
