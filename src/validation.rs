// ✅ Declaration Validator - hard-stop gate before export
// Fixed rule set: required fields, line items, non-blocking warnings
//
// Pure: same payload in, same report out (timestamp aside). Never fails on a
// malformed payload - absent or NaN values simply count as missing.

use crate::config::Config;
use crate::declaration::{Declaration, DeclarationPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pass,
    Fail,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pass => "pass",
            ReportStatus::Fail => "fail",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding, addressed by field path
///
/// Paths: `section.field`, `items[<index>].field` or `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>, field_label: Option<&str>) -> Self {
        ValidationError {
            path: path.into(),
            message: message.into(),
            field_label: field_label.map(str::to_string),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Snapshot verdict for one payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ReportStatus,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    pub validated_at: DateTime<Utc>,

    /// Fingerprint of the payload this report was computed from
    #[serde(default)]
    pub payload_fingerprint: String,
}

impl ValidationReport {
    fn from_findings(
        payload: &DeclarationPayload,
        errors: Vec<ValidationError>,
        warnings: Vec<ValidationError>,
    ) -> Self {
        let status = if errors.is_empty() {
            ReportStatus::Pass
        } else {
            ReportStatus::Fail
        };

        ValidationReport {
            status,
            errors,
            warnings,
            validated_at: Utc::now(),
            payload_fingerprint: payload.fingerprint(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ReportStatus::Pass
    }

    /// True when the report was computed from exactly this payload
    pub fn matches(&self, payload: &DeclarationPayload) -> bool {
        self.payload_fingerprint == payload.fingerprint()
    }

    /// First error message for an exact path
    pub fn field_error(&self, path: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.message.as_str())
    }

    pub fn has_field_error(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }

    /// All errors whose path starts with `section`
    pub fn section_errors(&self, section: &str) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.path.starts_with(section))
            .collect()
    }

    pub fn section_has_errors(&self, section: &str) -> bool {
        self.errors.iter().any(|e| e.path.starts_with(section))
    }

    pub fn summary(&self) -> String {
        format!(
            "Validation {}: {} error(s), {} warning(s)",
            self.status,
            self.errors.len(),
            self.warnings.len()
        )
    }
}

// Lookups over "maybe no report yet" - absence reads as no errors

pub fn field_error<'a>(report: Option<&'a ValidationReport>, path: &str) -> Option<&'a str> {
    report.and_then(|r| r.field_error(path))
}

pub fn has_field_error(report: Option<&ValidationReport>, path: &str) -> bool {
    report.map(|r| r.has_field_error(path)).unwrap_or(false)
}

pub fn section_errors<'a>(report: Option<&'a ValidationReport>, section: &str) -> Vec<&'a ValidationError> {
    report.map(|r| r.section_errors(section)).unwrap_or_default()
}

pub fn section_has_errors(report: Option<&ValidationReport>, section: &str) -> bool {
    report.map(|r| r.section_has_errors(section)).unwrap_or(false)
}

// ============================================================================
// FIELD LABELS
// ============================================================================

pub const ITEMS_PATH: &str = "items";
pub const HS_CODE_FIELD: &str = "tarification_hscode_commodity_code";
pub const CURRENCY_PATH: &str = "valuation.currency_code";
pub const DECLARANT_REFERENCE_PATH: &str = "declarant.reference_number";

const FIELD_LABELS: &[(&str, &str)] = &[
    ("identification.office_segment_customs_clearance_office_code", "Customs Office Code"),
    ("identification.type_type_of_declaration", "Declaration Type"),
    ("declarant.declarant_code", "Declarant Code"),
    ("traders.consignee_consignee_code", "Consignee Code"),
    ("valuation.total_total_invoice", "Total Invoice Amount"),
    ("valuation.total_cif", "Total CIF Value"),
    (ITEMS_PATH, "Line Items"),
];

/// Human label registered for a field path
pub fn field_label(path: &str) -> Option<&'static str> {
    FIELD_LABELS
        .iter()
        .find(|(registered, _)| *registered == path)
        .map(|(_, label)| *label)
}

/// Path of a field on the item at `index` (zero-based)
pub fn item_field_path(index: usize, field: &str) -> String {
    format!("{}[{}].{}", ITEMS_PATH, index, field)
}

// ============================================================================
// REQUIRED FIELD ACCESSORS
// ============================================================================

enum FieldValue<'a> {
    Text(Option<&'a str>),
    Number(Option<f64>),
}

impl FieldValue<'_> {
    fn is_missing(&self) -> bool {
        match self {
            FieldValue::Text(value) => value.map(str::is_empty).unwrap_or(true),
            FieldValue::Number(value) => value.map(f64::is_nan).unwrap_or(true),
        }
    }
}

struct RequiredField {
    path: &'static str,
    read: fn(&DeclarationPayload) -> FieldValue<'_>,
}

fn office_code(p: &DeclarationPayload) -> FieldValue<'_> {
    FieldValue::Text(p.identification.office_segment_customs_clearance_office_code.as_deref())
}

fn declaration_type(p: &DeclarationPayload) -> FieldValue<'_> {
    FieldValue::Text(p.identification.type_type_of_declaration.as_deref())
}

fn declarant_code(p: &DeclarationPayload) -> FieldValue<'_> {
    FieldValue::Text(p.declarant.declarant_code.as_deref())
}

fn consignee_code(p: &DeclarationPayload) -> FieldValue<'_> {
    FieldValue::Text(p.traders.consignee_consignee_code.as_deref())
}

fn total_invoice(p: &DeclarationPayload) -> FieldValue<'_> {
    FieldValue::Number(p.valuation.total_total_invoice)
}

fn total_cif(p: &DeclarationPayload) -> FieldValue<'_> {
    FieldValue::Number(p.valuation.total_cif)
}

/// Evaluated in this order; error order follows it
const REQUIRED_FIELDS: &[RequiredField] = &[
    RequiredField {
        path: "identification.office_segment_customs_clearance_office_code",
        read: office_code,
    },
    RequiredField {
        path: "identification.type_type_of_declaration",
        read: declaration_type,
    },
    RequiredField {
        path: "declarant.declarant_code",
        read: declarant_code,
    },
    RequiredField {
        path: "traders.consignee_consignee_code",
        read: consignee_code,
    },
    RequiredField {
        path: "valuation.total_total_invoice",
        read: total_invoice,
    },
    RequiredField {
        path: "valuation.total_cif",
        read: total_cif,
    },
];

/// Paths every declaration must fill before it can be exported
pub fn required_field_paths() -> impl Iterator<Item = &'static str> {
    REQUIRED_FIELDS.iter().map(|field| field.path)
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct Validator {
    /// Currency assumed when the declaration leaves it blank
    default_currency: String,
}

impl Validator {
    pub fn new() -> Self {
        Validator {
            default_currency: crate::config::DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Validator {
            default_currency: config.default_currency.clone(),
        }
    }

    /// Run every rule against the payload
    pub fn validate(&self, payload: &DeclarationPayload) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Rule 1: Required fields
        for field in REQUIRED_FIELDS {
            if let Some(error) = self.check_required(payload, field) {
                errors.push(error);
            }
        }

        // Rule 2: Line items
        errors.extend(self.check_items(payload));

        // Rule 3: Advisory warnings
        warnings.extend(self.check_warnings(payload));

        let report = ValidationReport::from_findings(payload, errors, warnings);
        tracing::debug!("{}", report.summary());
        report
    }

    fn check_required(&self, payload: &DeclarationPayload, field: &RequiredField) -> Option<ValidationError> {
        if !(field.read)(payload).is_missing() {
            return None;
        }

        let label = field_label(field.path);
        Some(ValidationError::new(
            field.path,
            format!("{} is required", label.unwrap_or(field.path)),
            label,
        ))
    }

    fn check_items(&self, payload: &DeclarationPayload) -> Vec<ValidationError> {
        if payload.items.is_empty() {
            return vec![ValidationError::new(
                ITEMS_PATH,
                "At least one line item is required",
                field_label(ITEMS_PATH),
            )];
        }

        payload
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.tarification_hscode_commodity_code
                    .as_deref()
                    .map(str::is_empty)
                    .unwrap_or(true)
            })
            .map(|(index, item)| {
                ValidationError::new(
                    item_field_path(index, HS_CODE_FIELD),
                    format!("Line {}: HS Code is required", item.line_number),
                    Some("HS Code"),
                )
            })
            .collect()
    }

    fn check_warnings(&self, payload: &DeclarationPayload) -> Vec<ValidationError> {
        let mut warnings = Vec::new();

        if is_blank(payload.valuation.currency_code.as_deref()) {
            warnings.push(ValidationError::new(
                CURRENCY_PATH,
                format!(
                    "Currency code not specified (defaulting to {})",
                    self.default_currency
                ),
                Some("Currency Code"),
            ));
        }

        if is_blank(payload.declarant.reference_number.as_deref()) {
            warnings.push(ValidationError::new(
                DECLARANT_REFERENCE_PATH,
                "Declarant reference number not provided",
                Some("Declarant Reference"),
            ));
        }

        warnings
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::is_empty).unwrap_or(true)
}

/// Validate a declaration's payload with the default rule settings
///
/// Does not touch the declaration; pair with
/// [`DeclarationStore::record_validation_report`](crate::store::DeclarationStore::record_validation_report).
pub fn validate(declaration: &Declaration) -> ValidationReport {
    Validator::new().validate(&declaration.payload)
}

// ============================================================================
// TESTS
// ============================================================================
