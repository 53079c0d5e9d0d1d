// 🧾 Declaration Model - ASYCUDA-aligned customs declaration record
// Payload sections, line items and the lifecycle status a declaration moves through
//
// Identity (id) never changes. Reference number is a display value only.

use crate::validation::ValidationReport;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ============================================================================
// STATUS
// ============================================================================

/// Workflow status of a declaration
///
/// Draft → Ready (passing validation) → Exported (export action).
/// Any payload edit drops the declaration back to Draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationStatus {
    Draft,
    Ready,
    Exported,
}

impl DeclarationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationStatus::Draft => "Draft",
            DeclarationStatus::Ready => "Ready",
            DeclarationStatus::Exported => "Exported",
        }
    }
}

impl std::fmt::Display for DeclarationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// The flat (non-list) sections of a payload that can be patched by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Identification,
    Declarant,
    Traders,
    Valuation,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Identification => "identification",
            Section::Declarant => "declarant",
            Section::Traders => "traders",
            Section::Valuation => "valuation",
        }
    }

    pub fn from_name(name: &str) -> Option<Section> {
        match name {
            "identification" => Some(Section::Identification),
            "declarant" => Some(Section::Declarant),
            "traders" => Some(Section::Traders),
            "valuation" => Some(Section::Valuation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentificationData {
    pub office_segment_customs_clearance_office_code: Option<String>,
    pub type_type_of_declaration: Option<String>,
    pub type_request_type: Option<String>,
    pub general_segment_registration_number_of_the_customs_declaration: Option<String>,
    pub general_segment_registration_date: Option<String>,
    pub principal_customs_agent_number: Option<String>,
    pub financial_transaction_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeclarantData {
    pub declarant_code: Option<String>,
    pub declarant_name: Option<String>,
    /// Declarant's own reference (not the declaration reference number)
    pub reference_number: Option<String>,
    pub declarant_address: Option<String>,
    pub declarant_contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TradersData {
    // Consignee (importer)
    pub consignee_consignee_code: Option<String>,
    pub consignee_consignee_name: Option<String>,
    pub consignee_address: Option<String>,
    pub consignee_country: Option<String>,

    // Consignor (exporter)
    pub consignor_code: Option<String>,
    pub consignor_name: Option<String>,
    pub consignor_address: Option<String>,
    pub consignor_country: Option<String>,

    pub notify_party_code: Option<String>,
    pub notify_party_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValuationData {
    pub total_total_invoice: Option<f64>,
    pub total_cif: Option<f64>,
    pub total_fob: Option<f64>,
    pub freight_amount: Option<f64>,
    pub insurance_amount: Option<f64>,
    pub other_charges: Option<f64>,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub incoterm: Option<String>,
    pub country_of_origin: Option<String>,
}

// ============================================================================
// LINE ITEM
// ============================================================================

/// One goods entry of a declaration
///
/// `id` is stable across reorderings; `line_number` is always the 1-based
/// position in the items list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarationItem {
    pub id: String,
    pub line_number: usize,

    #[serde(default)]
    pub tarification_hscode_commodity_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub country_of_origin: Option<String>,
    #[serde(default)]
    pub packages_number: Option<f64>,
    #[serde(default)]
    pub packages_kind: Option<String>,
    #[serde(default)]
    pub gross_weight: Option<f64>,
    #[serde(default)]
    pub net_weight: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_of_measure: Option<String>,
    #[serde(default)]
    pub statistical_value: Option<f64>,
    #[serde(default)]
    pub customs_value: Option<f64>,
    #[serde(default)]
    pub duty_rate: Option<f64>,
    #[serde(default)]
    pub duty_amount: Option<f64>,
    #[serde(default)]
    pub vat_rate: Option<f64>,
    #[serde(default)]
    pub vat_amount: Option<f64>,
    #[serde(default)]
    pub additional_code: Option<String>,
    #[serde(default)]
    pub preference_code: Option<String>,
}

impl DeclarationItem {
    /// Empty item with the given identity and position
    pub fn new(id: String, line_number: usize) -> Self {
        DeclarationItem {
            id,
            line_number,
            tarification_hscode_commodity_code: None,
            description: None,
            country_of_origin: None,
            packages_number: None,
            packages_kind: None,
            gross_weight: None,
            net_weight: None,
            quantity: None,
            unit_of_measure: None,
            statistical_value: None,
            customs_value: None,
            duty_rate: None,
            duty_amount: None,
            vat_rate: None,
            vat_amount: None,
            additional_code: None,
            preference_code: None,
        }
    }

    /// Fields a partial update may never overwrite
    pub const PROTECTED_FIELDS: [&'static str; 2] = ["id", "line_number"];
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// User-editable data of a declaration, grouped into sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarationPayload {
    #[serde(default)]
    pub identification: IdentificationData,
    #[serde(default)]
    pub declarant: DeclarantData,
    #[serde(default)]
    pub traders: TradersData,
    #[serde(default)]
    pub valuation: ValuationData,
    #[serde(default)]
    pub items: Vec<DeclarationItem>,
}

impl DeclarationPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge partial fields into one flat section
    ///
    /// Keys present in `fields` overwrite, `null` clears. Unknown keys and
    /// wrongly typed values are rejected and leave the payload unchanged.
    pub fn merge_section(
        &mut self,
        section: Section,
        fields: &Map<String, Value>,
    ) -> Result<(), serde_json::Error> {
        match section {
            Section::Identification => self.identification = merge_fields(&self.identification, fields)?,
            Section::Declarant => self.declarant = merge_fields(&self.declarant, fields)?,
            Section::Traders => self.traders = merge_fields(&self.traders, fields)?,
            Section::Valuation => self.valuation = merge_fields(&self.valuation, fields)?,
        }
        Ok(())
    }

    /// Reassign line numbers 1..N in current order
    pub fn renumber_items(&mut self) {
        for (index, item) in self.items.iter_mut().enumerate() {
            item.line_number = index + 1;
        }
    }

    pub fn item(&self, item_id: &str) -> Option<&DeclarationItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// Pretty JSON for the "copy payload" review action
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 of the canonical JSON payload
    ///
    /// Ties an export or snapshot back to the exact data it came from.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Overlay `patch` onto the serialized form of `current` and read it back
pub(crate) fn merge_fields<T>(current: &T, patch: &Map<String, Value>) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(current)?;
    if let Value::Object(fields) = &mut value {
        for (key, patched) in patch {
            fields.insert(key.clone(), patched.clone());
        }
    }
    serde_json::from_value(value)
}

// ============================================================================
// DECLARATION
// ============================================================================

/// One customs filing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Stable identity - NEVER changes
    pub id: String,

    /// Human-facing reference, e.g. TT-20240115-0042 (not unique)
    pub reference_number: String,

    pub status: DeclarationStatus,

    #[serde(rename = "payload_json")]
    pub payload: DeclarationPayload,

    pub last_validation_report: Option<ValidationReport>,

    /// Output of the most recent export; kept as history after later edits
    pub last_exported_xml: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Declaration {
    /// Fresh Draft with an empty payload
    pub fn new(id: String, reference_number: String) -> Self {
        let now = Utc::now();

        Declaration {
            id,
            reference_number,
            status: DeclarationStatus::Draft,
            payload: DeclarationPayload::empty(),
            last_validation_report: None,
            last_exported_xml: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Side effects of any payload edit: report cleared, back to Draft
    pub fn invalidate(&mut self) {
        self.last_validation_report = None;
        self.status = DeclarationStatus::Draft;
        self.touch();
    }

    /// True when the latest report passed and was computed from the current payload
    pub fn has_passing_report(&self) -> bool {
        self.last_validation_report
            .as_ref()
            .map(|report| report.passed() && report.matches(&self.payload))
            .unwrap_or(false)
    }

    /// Export is only reachable from Ready
    pub fn is_exportable(&self) -> bool {
        self.status == DeclarationStatus::Ready && self.has_passing_report()
    }
}

// ============================================================================
// TESTS
// ============================================================================
