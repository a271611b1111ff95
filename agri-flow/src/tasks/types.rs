use serde::{Deserialize, Serialize};

use crate::{
    intent::InsuranceAction,
    tools::{Diagnosis, ImageInput, Prescription, VendorOffer},
};

/// Context keys, one namespace per concern.
pub mod session_keys {
    pub const CROP: &str = "crop";
    pub const PENDING_IMAGE: &str = "pending_image";
    /// Digest of the last photo the classifier failed on or was unsure about
    pub const ATTEMPTED_IMAGE: &str = "attempted_image";
    pub const CLASSIFICATION: &str = "classification";
    pub const PRESCRIPTION: &str = "prescription";
    pub const INSURANCE: &str = "insurance";
    pub const VENDOR_QUERY: &str = "vendor_query";
    pub const VENDOR_OPTIONS: &str = "vendor_options";
    pub const SELECTED_ORDER: &str = "selected_order";
    pub const ORDERS: &str = "orders";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub disease: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_artifact: Option<String>,
    pub crop: Option<String>,
    /// Digest of the classified image
    pub image_digest: String,
}

impl ClassificationRecord {
    pub fn new(diagnosis: Diagnosis, crop: Option<String>, image: &ImageInput) -> Self {
        Self {
            disease: diagnosis.disease,
            confidence: diagnosis.confidence,
            attention_artifact: diagnosis.attention_artifact,
            crop,
            image_digest: image.digest(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    pub disease: String,
    pub treatment_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_notes: Option<String>,
    #[serde(default)]
    pub products: Vec<String>,
}

impl PrescriptionRecord {
    pub fn new(disease: impl Into<String>, prescription: Prescription) -> Self {
        Self {
            disease: disease.into(),
            treatment_text: prescription.treatment_text,
            dosage: prescription.dosage,
            safety_notes: prescription.safety_notes,
            products: prescription.products,
        }
    }

    /// Product to look for at vendors.
    pub fn primary_product(&self) -> Option<&str> {
        self.products.first().map(String::as_str)
    }
}

/// Insurance details gathered across turns. Absent fields are not written,
/// so merging a partial record never erases known values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsuranceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_hectare: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_action: Option<InsuranceAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_attempts: Option<u32>,
    /// Idempotency key of the purchase in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_for: Option<InsuredTerms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certified_for: Option<InsuredTerms>,
    /// Waiting for the user to supply missing details
    #[serde(default)]
    pub awaiting_details: bool,
}

impl InsuranceContext {
    /// Details `action` still needs, in the order they are asked for.
    pub fn missing_for(&self, action: InsuranceAction) -> Vec<&'static str> {
        let needs_crop = action != InsuranceAction::GetCompanies;
        let needs_area = matches!(
            action,
            InsuranceAction::CalculatePremium | InsuranceAction::GenerateCertificate
        );
        let mut missing = Vec::new();
        if needs_crop && self.crop.is_none() {
            missing.push("crop");
        }
        if needs_area && self.area_hectare.is_none() {
            missing.push("farm area");
        }
        if self.region.is_none() {
            missing.push("state");
        }
        if action == InsuranceAction::GenerateCertificate && self.applicant_name.is_none() {
            missing.push("applicant name");
        }
        missing
    }

    /// Crop, area and state as they stand now.
    pub fn terms(&self) -> InsuredTerms {
        InsuredTerms {
            crop: self.crop.clone(),
            area_hectare: self.area_hectare,
            region: self.region.clone(),
        }
    }

    /// Premium quoted for the current terms.
    pub fn current_premium(&self) -> Option<f64> {
        self.premium
            .filter(|_| self.quoted_for.as_ref() == Some(&self.terms()))
    }

    /// Certificate issued for the current terms.
    pub fn current_certificate(&self) -> Option<&str> {
        self.certificate_reference
            .as_deref()
            .filter(|_| self.certified_for.as_ref() == Some(&self.terms()))
    }
}

/// What a premium quote or certificate was issued for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuredTerms {
    pub crop: Option<String>,
    pub area_hectare: Option<f64>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub confirmation_pending: bool,
}

impl VendorQuery {
    pub fn is_ready(&self) -> bool {
        self.product.is_some() && self.location.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    AwaitingConfirmation,
    Placed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub reference: String,
    pub vendor: String,
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub status: OrderStatus,
}

impl Order {
    pub fn from_offer(offer: &VendorOffer, product: &str) -> Self {
        let id = uuid::Uuid::new_v4().as_u128() as u32;
        Self {
            reference: format!("ORD-{id:08X}"),
            vendor: offer.vendor.clone(),
            product: offer.product.clone().unwrap_or_else(|| product.to_string()),
            price: offer.price,
            status: OrderStatus::AwaitingConfirmation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_insurance_context_serializes_only_known_fields() {
        let partial = InsuranceContext {
            region: Some("Punjab".to_string()),
            ..InsuranceContext::default()
        };
        assert_eq!(
            serde_json::to_value(&partial).unwrap(),
            serde_json::json!({"region": "Punjab", "awaiting_details": false})
        );
        assert_eq!(
            partial.missing_for(InsuranceAction::CalculatePremium),
            vec!["crop", "farm area"]
        );
        assert!(partial.missing_for(InsuranceAction::GetCompanies).is_empty());
        assert_eq!(
            partial.missing_for(InsuranceAction::GenerateCertificate),
            vec!["crop", "farm area", "applicant name"]
        );
    }

    #[test]
    fn quotes_and_certificates_only_count_for_their_terms() {
        let mut insurance = InsuranceContext {
            crop: Some("wheat".to_string()),
            area_hectare: Some(5.0),
            region: Some("Punjab".to_string()),
            premium: Some(1250.5),
            certificate_reference: Some("PMFBY-1".to_string()),
            ..InsuranceContext::default()
        };
        insurance.quoted_for = Some(insurance.terms());
        insurance.certified_for = Some(insurance.terms());
        assert_eq!(insurance.current_premium(), Some(1250.5));
        assert_eq!(insurance.current_certificate(), Some("PMFBY-1"));

        insurance.area_hectare = Some(8.0);
        assert_eq!(insurance.current_premium(), None);
        assert_eq!(insurance.current_certificate(), None);
    }

    #[test]
    fn order_references_are_formatted() {
        let offer = VendorOffer {
            vendor: "Kisan Agro".to_string(),
            price: Some(420.0),
            availability: None,
            product: None,
        };
        let order = Order::from_offer(&offer, "mancozeb");
        assert!(order.reference.starts_with("ORD-"));
        assert_eq!(order.reference.len(), 12);
        assert_eq!(order.product, "mancozeb");
        assert_eq!(order.status, OrderStatus::AwaitingConfirmation);
    }
}
