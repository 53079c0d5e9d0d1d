// 🗂️ Declaration Store - owned collection + status state machine
//
// Every payload edit: mutate → clear validation report → status = Draft → touch.
// Every mutation is all-or-nothing: edits run on a copy and commit on success.

use crate::config::Config;
use crate::db::{Event, Snapshot};
use crate::declaration::{
    merge_fields, Declaration, DeclarationItem, DeclarationPayload, DeclarationStatus, Section,
};
use crate::reference::{
    copy_reference, DatedReferenceGenerator, IdGenerator, ReferenceGenerator, UuidGenerator,
};
use crate::validation::{ValidationReport, Validator};
use chrono::Utc;
use serde_json::{Map, Value};

const ENTITY_TYPE: &str = "declaration";
const ACTOR: &str = "declaration_store";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("declaration not found: {0}")]
    NotFound(String),

    #[error("line item {item_id} not found in declaration {declaration_id}")]
    ItemNotFound {
        declaration_id: String,
        item_id: String,
    },

    #[error("invalid {section} fields: {source}")]
    InvalidFields {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("field `{0}` is managed by the store and cannot be edited")]
    ProtectedField(String),

    #[error("validation report for declaration {0} was computed from a different payload")]
    StaleReport(String),

    #[error("declaration {id} cannot be exported: {reason}")]
    ExportNotAllowed { id: String, reason: &'static str },
}

// ============================================================================
// STATUS COUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub draft: usize,
    pub ready: usize,
    pub exported: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.draft + self.ready + self.exported
    }
}

// ============================================================================
// DECLARATION STORE
// ============================================================================

/// Authoritative in-memory collection of declarations
///
/// Owned by one caller and mutated through `&mut self`; reads hand out
/// point-in-time clones. Durable storage snapshots [`declarations`](Self::declarations).
pub struct DeclarationStore {
    declarations: Vec<Declaration>,
    current_id: Option<String>,
    references: Box<dyn ReferenceGenerator>,
    ids: Box<dyn IdGenerator>,

    /// Lifecycle events not yet written to the audit log
    journal: Vec<Event>,
}

impl DeclarationStore {
    pub fn new() -> Self {
        Self::with_generators(
            Box::new(DatedReferenceGenerator::default()),
            Box::new(UuidGenerator),
        )
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_generators(
            Box::new(DatedReferenceGenerator::new(config.jurisdiction_prefix.clone())),
            Box::new(UuidGenerator),
        )
    }

    pub fn with_generators(
        references: Box<dyn ReferenceGenerator>,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        DeclarationStore {
            declarations: Vec::new(),
            current_id: None,
            references,
            ids,
            journal: Vec::new(),
        }
    }

    /// Rehydrate from a persisted snapshot, keeping this store's generators
    ///
    /// The current pointer is restored only if it still names a declaration.
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.declarations = snapshot.declarations;
        self.current_id = snapshot
            .current_id
            .filter(|id| self.declarations.iter().any(|d| &d.id == id));
        self
    }

    /// Everything in insertion order (what gets snapshotted)
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// New empty Draft; becomes the current declaration
    pub fn create_declaration(&mut self) -> Declaration {
        let reference = self.references.generate(Utc::now());
        let declaration = Declaration::new(self.ids.next_id(), reference);

        tracing::info!("Created declaration {}", declaration.reference_number);
        self.record_event(
            "declaration_created",
            &declaration.id,
            serde_json::json!({ "reference_number": declaration.reference_number }),
        );

        self.current_id = Some(declaration.id.clone());
        self.declarations.push(declaration.clone());
        declaration
    }

    /// Fresh Draft copy: new identity, `-COPY` reference, deep-copied payload
    ///
    /// Copied line items get fresh ids too; item ids stay unique process-wide.
    pub fn duplicate_declaration(&mut self, id: &str) -> Option<Declaration> {
        let source = self.declarations.iter().find(|d| d.id == id)?;

        let mut duplicated = Declaration::new(
            self.ids.next_id(),
            copy_reference(&source.reference_number),
        );
        duplicated.payload = source.payload.clone();
        for item in &mut duplicated.payload.items {
            item.id = self.ids.next_id();
        }

        tracing::info!(
            "Duplicated declaration {} as {}",
            source.reference_number,
            duplicated.reference_number
        );
        self.record_event(
            "declaration_duplicated",
            &duplicated.id,
            serde_json::json!({ "source_id": id }),
        );

        self.declarations.push(duplicated.clone());
        Some(duplicated)
    }

    /// Remove a declaration; unknown ids are ignored
    pub fn delete_declaration(&mut self, id: &str) {
        let before = self.declarations.len();
        self.declarations.retain(|d| d.id != id);

        if self.current_id.as_deref() == Some(id) {
            self.current_id = None;
        }

        if self.declarations.len() < before {
            tracing::info!("Deleted declaration {}", id);
            self.record_event("declaration_deleted", id, serde_json::json!({}));
        }
    }

    pub fn get_declaration(&self, id: &str) -> Option<Declaration> {
        self.declarations.iter().find(|d| d.id == id).cloned()
    }

    pub fn set_current(&mut self, id: Option<&str>) {
        self.current_id = id.map(str::to_string);
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn current(&self) -> Option<Declaration> {
        self.current_id
            .as_deref()
            .and_then(|id| self.get_declaration(id))
    }

    /// Rename the display reference; not a payload edit, status is kept
    pub fn update_reference_number(&mut self, id: &str, reference: &str) -> Result<(), StoreError> {
        let declaration = find_mut(&mut self.declarations, id)?;
        declaration.reference_number = reference.to_string();
        declaration.touch();
        Ok(())
    }

    // ========================================================================
    // PAYLOAD EDITS
    // ========================================================================

    /// Merge partial fields into one section (`null` clears a field)
    pub fn update_section(
        &mut self,
        id: &str,
        section: Section,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.edit_payload(id, |payload, _| {
            payload
                .merge_section(section, fields)
                .map_err(|source| StoreError::InvalidFields {
                    section: section.as_str(),
                    source,
                })
        })?;

        tracing::debug!("Updated {} of {}", section.as_str(), id);
        Ok(())
    }

    /// Append an empty line item; returns its id
    pub fn add_item(&mut self, id: &str) -> Result<String, StoreError> {
        self.edit_payload(id, |payload, ids| {
            let item = DeclarationItem::new(ids.next_id(), payload.items.len() + 1);
            let item_id = item.id.clone();
            payload.items.push(item);
            Ok(item_id)
        })
    }

    /// Merge partial fields into the item with `item_id`
    pub fn update_item(
        &mut self,
        id: &str,
        item_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.edit_payload(id, |payload, _| {
            if let Some(field) = DeclarationItem::PROTECTED_FIELDS
                .iter()
                .find(|field| fields.contains_key(**field))
            {
                return Err(StoreError::ProtectedField(field.to_string()));
            }

            let item = payload
                .items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| item_not_found(id, item_id))?;

            *item = merge_fields(&*item, fields).map_err(|source| StoreError::InvalidFields {
                section: "items",
                source,
            })?;
            Ok(())
        })
    }

    /// Drop an item and renumber the rest 1..N
    pub fn remove_item(&mut self, id: &str, item_id: &str) -> Result<(), StoreError> {
        self.edit_payload(id, |payload, _| {
            let before = payload.items.len();
            payload.items.retain(|item| item.id != item_id);
            if payload.items.len() == before {
                return Err(item_not_found(id, item_id));
            }

            payload.renumber_items();
            Ok(())
        })
    }

    /// Copy an item's fields to a new item appended at the end; returns its id
    pub fn duplicate_item(&mut self, id: &str, item_id: &str) -> Result<String, StoreError> {
        self.edit_payload(id, |payload, ids| {
            let source = payload
                .item(item_id)
                .ok_or_else(|| item_not_found(id, item_id))?;

            let mut copy = source.clone();
            copy.id = ids.next_id();
            copy.line_number = payload.items.len() + 1;

            let copy_id = copy.id.clone();
            payload.items.push(copy);
            Ok(copy_id)
        })
    }

    /// Run `edit` on a copy of the payload; commit plus edit side effects on Ok
    fn edit_payload<T, F>(&mut self, id: &str, edit: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut DeclarationPayload, &dyn IdGenerator) -> Result<T, StoreError>,
    {
        let ids = self.ids.as_ref();
        let declaration = find_mut(&mut self.declarations, id)?;

        let mut payload = declaration.payload.clone();
        let output = edit(&mut payload, ids)?;

        let previous = declaration.status;
        declaration.payload = payload;
        declaration.invalidate();

        if previous != DeclarationStatus::Draft {
            tracing::info!(
                "Declaration {} edited: {} → Draft",
                declaration.reference_number,
                previous
            );
        }

        Ok(output)
    }

    // ========================================================================
    // VALIDATION + EXPORT TRANSITIONS
    // ========================================================================

    /// Run `validator` on the stored payload and record the result
    pub fn validate_declaration(
        &mut self,
        id: &str,
        validator: &Validator,
    ) -> Result<DeclarationStatus, StoreError> {
        let report = {
            let declaration = find_mut(&mut self.declarations, id)?;
            validator.validate(&declaration.payload)
        };
        self.record_validation_report(id, report)
    }

    /// Attach a report: Ready when it passes, Draft otherwise
    ///
    /// The report must have been computed from the declaration's current payload.
    pub fn record_validation_report(
        &mut self,
        id: &str,
        report: ValidationReport,
    ) -> Result<DeclarationStatus, StoreError> {
        let declaration = find_mut(&mut self.declarations, id)?;

        if !report.matches(&declaration.payload) {
            tracing::warn!(
                "Refused stale validation report for {}",
                declaration.reference_number
            );
            return Err(StoreError::StaleReport(id.to_string()));
        }

        declaration.status = if report.passed() {
            DeclarationStatus::Ready
        } else {
            DeclarationStatus::Draft
        };
        let status = declaration.status;
        let event_data = serde_json::json!({
            "status": report.status,
            "errors": report.errors.len(),
            "warnings": report.warnings.len(),
            "payload_fingerprint": declaration.payload.fingerprint(),
        });

        tracing::info!(
            "Declaration {}: {} → {}",
            declaration.reference_number,
            report.summary(),
            status
        );
        declaration.last_validation_report = Some(report);
        declaration.touch();

        self.record_event("declaration_validated", id, event_data);
        Ok(status)
    }

    /// Attach export output and move Ready → Exported
    ///
    /// Refused unless the declaration is Ready with a passing report for its
    /// current payload. Exporting again requires another validation run.
    pub fn record_export(&mut self, id: &str, output: String) -> Result<(), StoreError> {
        let declaration = find_mut(&mut self.declarations, id)?;

        if !declaration.is_exportable() {
            tracing::warn!(
                "Refused export of {}: status {}, passing report: {}",
                declaration.reference_number,
                declaration.status,
                declaration.has_passing_report()
            );
            return Err(export_not_allowed(id));
        }

        let event_data = serde_json::json!({
            "payload_fingerprint": declaration.payload.fingerprint(),
            "output_bytes": output.len(),
        });

        declaration.last_exported_xml = Some(output);
        declaration.status = DeclarationStatus::Exported;
        declaration.touch();

        tracing::info!("Exported declaration {}", declaration.reference_number);
        self.record_event("declaration_exported", id, event_data);
        Ok(())
    }

    // ========================================================================
    // LIST VIEWS
    // ========================================================================

    /// All declarations, most recently updated first
    pub fn list(&self) -> Vec<Declaration> {
        self.search("")
    }

    /// Case-insensitive match on reference number or status, newest first
    pub fn search(&self, query: &str) -> Vec<Declaration> {
        let query = query.trim().to_lowercase();

        let mut matches: Vec<Declaration> = self
            .declarations
            .iter()
            .filter(|d| {
                query.is_empty()
                    || d.reference_number.to_lowercase().contains(&query)
                    || d.status.as_str().to_lowercase().contains(&query)
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for declaration in &self.declarations {
            match declaration.status {
                DeclarationStatus::Draft => counts.draft += 1,
                DeclarationStatus::Ready => counts.ready += 1,
                DeclarationStatus::Exported => counts.exported += 1,
            }
        }
        counts
    }

    // ========================================================================
    // AUDIT JOURNAL
    // ========================================================================

    fn record_event(&mut self, event_type: &str, entity_id: &str, data: Value) {
        self.journal
            .push(Event::new(event_type, ENTITY_TYPE, entity_id, data, ACTOR));
    }

    /// Lifecycle events recorded since the last [`take_events`](Self::take_events)
    pub fn pending_events(&self) -> &[Event] {
        &self.journal
    }

    /// Hand over pending lifecycle events (for [`crate::db::insert_events`])
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.journal)
    }
}

impl Default for DeclarationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(declarations: &'a mut [Declaration], id: &str) -> Result<&'a mut Declaration, StoreError> {
    declarations
        .iter_mut()
        .find(|d| d.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

pub(crate) fn export_not_allowed(id: &str) -> StoreError {
    StoreError::ExportNotAllowed {
        id: id.to_string(),
        reason: "declaration is not Ready with a passing validation report",
    }
}

fn item_not_found(declaration_id: &str, item_id: &str) -> StoreError {
    StoreError::ItemNotFound {
        declaration_id: declaration_id.to_string(),
        item_id: item_id.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{validate, ReportStatus};
    use serde_json::json;
    use std::cell::Cell;

    /// Predictable ids: id-1, id-2, ...
    struct SequentialIds(Cell<u64>);

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> String {
            let next = self.0.get() + 1;
            self.0.set(next);
            format!("id-{}", next)
        }
    }

    fn create_test_store() -> DeclarationStore {
        DeclarationStore::with_generators(
            Box::new(DatedReferenceGenerator::default()),
            Box::new(SequentialIds(Cell::new(0))),
        )
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    /// Declaration that passes validation, with one item
    fn create_valid_declaration(store: &mut DeclarationStore) -> String {
        let id = store.create_declaration().id;

        store
            .update_section(
                &id,
                Section::Identification,
                &fields(json!({
                    "office_segment_customs_clearance_office_code": "TTPOSPBL",
                    "type_type_of_declaration": "IM4",
                })),
            )
            .unwrap();
        store
            .update_section(&id, Section::Declarant, &fields(json!({"declarant_code": "D123"})))
            .unwrap();
        store
            .update_section(&id, Section::Traders, &fields(json!({"consignee_consignee_code": "C456"})))
            .unwrap();
        store
            .update_section(
                &id,
                Section::Valuation,
                &fields(json!({"total_total_invoice": 1000, "total_cif": 1050})),
            )
            .unwrap();

        let item_id = store.add_item(&id).unwrap();
        store
            .update_item(
                &id,
                &item_id,
                &fields(json!({"tarification_hscode_commodity_code": "8471.30.00"})),
            )
            .unwrap();

        id
    }

    fn validate_and_record(store: &mut DeclarationStore, id: &str) -> DeclarationStatus {
        let report = validate(&store.get_declaration(id).unwrap());
        store.record_validation_report(id, report).unwrap()
    }

    fn line_numbers(store: &DeclarationStore, id: &str) -> Vec<usize> {
        store
            .get_declaration(id)
            .unwrap()
            .payload
            .items
            .iter()
            .map(|item| item.line_number)
            .collect()
    }

    #[test]
    fn test_create_declaration() {
        let mut store = create_test_store();

        let declaration = store.create_declaration();

        assert_eq!(declaration.status, DeclarationStatus::Draft);
        assert_eq!(declaration.payload, DeclarationPayload::empty());
        assert!(declaration.reference_number.starts_with("TT-"));
        assert_eq!(store.current().unwrap().id, declaration.id);
        assert_eq!(store.get_declaration(&declaration.id), Some(declaration));
    }

    #[test]
    fn test_validation_pass_moves_to_ready() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);

        let status = validate_and_record(&mut store, &id);

        assert_eq!(status, DeclarationStatus::Ready);
        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Ready);
        assert_eq!(
            declaration.last_validation_report.unwrap().status,
            ReportStatus::Pass
        );
    }

    #[test]
    fn test_validation_fail_stays_draft() {
        let mut store = create_test_store();
        let id = store.create_declaration().id;

        let status = validate_and_record(&mut store, &id);

        assert_eq!(status, DeclarationStatus::Draft);
        let declaration = store.get_declaration(&id).unwrap();
        assert!(!declaration.has_passing_report());
        assert!(declaration.last_validation_report.is_some());
    }

    #[test]
    fn test_edit_after_ready_returns_to_draft() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);

        store
            .update_section(&id, Section::Valuation, &fields(json!({"currency_code": "TTD"})))
            .unwrap();

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Draft);
        assert!(declaration.last_validation_report.is_none());
    }

    #[test]
    fn test_item_ops_after_exported_return_to_draft() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);
        store.record_export(&id, "<ASYCUDA/>".to_string()).unwrap();

        let item_id = store.add_item(&id).unwrap();

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Draft);
        assert!(declaration.last_validation_report.is_none());
        // Exported output stays as history
        assert_eq!(declaration.last_exported_xml.as_deref(), Some("<ASYCUDA/>"));

        store
            .update_item(&id, &item_id, &fields(json!({"tarification_hscode_commodity_code": "8517.12"})))
            .unwrap();

        for op in 0..3 {
            assert_eq!(validate_and_record(&mut store, &id), DeclarationStatus::Ready);
            match op {
                0 => store
                    .update_item(&id, &item_id, &fields(json!({"description": "Handsets"})))
                    .unwrap(),
                1 => {
                    store.duplicate_item(&id, &item_id).unwrap();
                }
                _ => store.remove_item(&id, &item_id).unwrap(),
            }

            let declaration = store.get_declaration(&id).unwrap();
            assert_eq!(declaration.status, DeclarationStatus::Draft, "op {op}");
            assert!(declaration.last_validation_report.is_none(), "op {op}");
        }
    }

    #[test]
    fn test_export_requires_passing_report() {
        let mut store = create_test_store();
        let id = store.create_declaration().id;

        let result = store.record_export(&id, "<ASYCUDA/>".to_string());
        assert!(matches!(result, Err(StoreError::ExportNotAllowed { .. })));

        validate_and_record(&mut store, &id);
        let result = store.record_export(&id, "<ASYCUDA/>".to_string());
        assert!(matches!(result, Err(StoreError::ExportNotAllowed { .. })));

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Draft);
        assert!(declaration.last_exported_xml.is_none());
    }

    #[test]
    fn test_export_moves_to_exported() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);

        store.record_export(&id, "<ASYCUDA/>".to_string()).unwrap();

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Exported);
        assert_eq!(declaration.last_exported_xml.as_deref(), Some("<ASYCUDA/>"));
        assert!(declaration.has_passing_report());
    }

    #[test]
    fn test_stale_report_is_refused() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        let old_report = validate(&store.get_declaration(&id).unwrap());
        assert!(old_report.passed());

        store
            .update_section(
                &id,
                Section::Identification,
                &fields(json!({"office_segment_customs_clearance_office_code": null})),
            )
            .unwrap();

        let result = store.record_validation_report(&id, old_report);
        assert!(matches!(result, Err(StoreError::StaleReport(_))));

        let result = store.record_export(&id, "<ASYCUDA/>".to_string());
        assert!(matches!(result, Err(StoreError::ExportNotAllowed { .. })));

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Draft);
        assert!(declaration.last_validation_report.is_none());
        assert!(declaration.last_exported_xml.is_none());
    }

    #[test]
    fn test_validate_declaration_uses_stored_payload() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);

        let status = store.validate_declaration(&id, &Validator::new()).unwrap();
        assert_eq!(status, DeclarationStatus::Ready);

        store
            .update_section(&id, Section::Declarant, &fields(json!({"declarant_code": ""})))
            .unwrap();
        let status = store.validate_declaration(&id, &Validator::new()).unwrap();
        assert_eq!(status, DeclarationStatus::Draft);

        let report = store.get_declaration(&id).unwrap().last_validation_report.unwrap();
        assert!(report.has_field_error("declarant.declarant_code"));
        assert!(matches!(
            store.validate_declaration("nope", &Validator::new()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_reexport_requires_revalidation() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);
        store.record_export(&id, "<ASYCUDA v=\"1\"/>".to_string()).unwrap();

        let result = store.record_export(&id, "<ASYCUDA v=\"2\"/>".to_string());
        assert!(matches!(result, Err(StoreError::ExportNotAllowed { .. })));
        assert_eq!(
            store.get_declaration(&id).unwrap().last_exported_xml.as_deref(),
            Some("<ASYCUDA v=\"1\"/>")
        );

        assert_eq!(validate_and_record(&mut store, &id), DeclarationStatus::Ready);
        store.record_export(&id, "<ASYCUDA v=\"2\"/>".to_string()).unwrap();

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.status, DeclarationStatus::Exported);
        assert_eq!(declaration.last_exported_xml.as_deref(), Some("<ASYCUDA v=\"2\"/>"));
    }

    #[test]
    fn test_update_item_on_unknown_declaration_is_not_found() {
        let mut store = create_test_store();

        let result = store.update_item("nope", "item", &fields(json!({"line_number": 3})));

        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "nope"));
    }

    #[test]
    fn test_remove_item_renumbers() {
        let mut store = create_test_store();
        let id = store.create_declaration().id;
        let item_ids: Vec<String> = (0..4).map(|_| store.add_item(&id).unwrap()).collect();
        assert_eq!(line_numbers(&store, &id), vec![1, 2, 3, 4]);

        store.remove_item(&id, &item_ids[1]).unwrap();

        let items = store.get_declaration(&id).unwrap().payload.items;
        let remaining: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(remaining, vec![item_ids[0].as_str(), item_ids[2].as_str(), item_ids[3].as_str()]);
        assert_eq!(line_numbers(&store, &id), vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_item_appends_with_new_identity() {
        let mut store = create_test_store();
        let id = store.create_declaration().id;
        let first = store.add_item(&id).unwrap();
        store.add_item(&id).unwrap();
        store
            .update_item(&id, &first, &fields(json!({"tarification_hscode_commodity_code": "0901.11", "net_weight": 12.5})))
            .unwrap();

        let copy_id = store.duplicate_item(&id, &first).unwrap();

        let items = store.get_declaration(&id).unwrap().payload.items;
        assert_eq!(items.len(), 3);
        let copy = &items[2];
        assert_eq!(copy.id, copy_id);
        assert_ne!(copy.id, first);
        assert_eq!(copy.line_number, 3);
        assert_eq!(copy.tarification_hscode_commodity_code.as_deref(), Some("0901.11"));
        assert_eq!(copy.net_weight, Some(12.5));
    }

    #[test]
    fn test_update_item_leaves_other_items_unchanged() {
        let mut store = create_test_store();
        let id = store.create_declaration().id;
        let first = store.add_item(&id).unwrap();
        let second = store.add_item(&id).unwrap();
        let before = store.get_declaration(&id).unwrap().payload.items[1].clone();

        store
            .update_item(&id, &first, &fields(json!({"quantity": 10, "unit_of_measure": "NMB"})))
            .unwrap();

        let items = store.get_declaration(&id).unwrap().payload.items;
        assert_eq!(items[0].quantity, Some(10.0));
        assert_eq!(items[0].unit_of_measure.as_deref(), Some("NMB"));
        assert_eq!(items[1], before);
        assert_eq!(items[1].id, second);
    }

    #[test]
    fn test_update_item_rejects_protected_fields() {
        let mut store = create_test_store();
        let id = store.create_declaration().id;
        let item_id = store.add_item(&id).unwrap();

        let result = store.update_item(&id, &item_id, &fields(json!({"line_number": 7})));
        assert!(matches!(result, Err(StoreError::ProtectedField(field)) if field == "line_number"));

        let result = store.update_item(&id, &item_id, &fields(json!({"id": "other"})));
        assert!(matches!(result, Err(StoreError::ProtectedField(_))));

        assert_eq!(line_numbers(&store, &id), vec![1]);
    }

    #[test]
    fn test_failed_edit_is_atomic() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);
        let before = store.get_declaration(&id).unwrap();

        let result = store.update_section(
            &id,
            Section::Valuation,
            &fields(json!({"total_cif": 2000, "not_a_field": 1})),
        );
        assert!(matches!(result, Err(StoreError::InvalidFields { section: "valuation", .. })));

        let result = store.remove_item(&id, "missing-item");
        assert!(matches!(result, Err(StoreError::ItemNotFound { .. })));

        assert_eq!(store.get_declaration(&id).unwrap(), before);
    }

    #[test]
    fn test_unknown_declaration() {
        let mut store = create_test_store();

        assert!(store.get_declaration("nope").is_none());
        assert!(store.duplicate_declaration("nope").is_none());
        assert!(matches!(store.add_item("nope"), Err(StoreError::NotFound(_))));
        store.delete_declaration("nope");
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_declaration_is_fresh_draft() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);
        let source = store.get_declaration(&id).unwrap();

        let copy = store.duplicate_declaration(&id).unwrap();

        assert_ne!(copy.id, source.id);
        assert_eq!(copy.reference_number, format!("{}-COPY", source.reference_number));
        assert_eq!(copy.status, DeclarationStatus::Draft);
        assert!(copy.last_validation_report.is_none());
        assert!(copy.last_exported_xml.is_none());

        let mut rekeyed = copy.payload.clone();
        for (item, original) in rekeyed.items.iter_mut().zip(&source.payload.items) {
            assert_ne!(item.id, original.id);
            item.id = original.id.clone();
        }
        assert_eq!(rekeyed, source.payload);

        // Deep copy: editing the copy's items leaves the source alone
        let copied_item = copy.payload.items[0].id.clone();
        store
            .update_item(&copy.id, &copied_item, &fields(json!({"tarification_hscode_commodity_code": null})))
            .unwrap();
        store.add_item(&copy.id).unwrap();

        let source_after = store.get_declaration(&id).unwrap();
        assert_eq!(source_after.payload, source.payload);
        assert_eq!(source_after.status, DeclarationStatus::Ready);
    }

    #[test]
    fn test_delete_clears_current() {
        let mut store = create_test_store();
        let first = store.create_declaration().id;
        let second = store.create_declaration().id;
        assert_eq!(store.current().unwrap().id, second);

        store.delete_declaration(&first);
        assert_eq!(store.current().unwrap().id, second);

        store.delete_declaration(&second);
        assert!(store.current().is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_update_reference_number_keeps_status() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);

        store.update_reference_number(&id, "TT-CUSTOM-1").unwrap();

        let declaration = store.get_declaration(&id).unwrap();
        assert_eq!(declaration.reference_number, "TT-CUSTOM-1");
        assert_eq!(declaration.status, DeclarationStatus::Ready);
        assert!(declaration.last_validation_report.is_some());
    }

    #[test]
    fn test_search_and_status_counts() {
        let mut store = create_test_store();
        let ready = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &ready);
        store.update_reference_number(&ready, "TT-20240115-0001").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let draft = store.create_declaration().id;
        store.update_reference_number(&draft, "TT-20240116-0002").unwrap();

        let found = store.search("0116");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, draft);

        let found = store.search("  READY ");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ready);

        // Newest update first
        let listed: Vec<String> = store.list().into_iter().map(|d| d.id).collect();
        assert_eq!(listed, vec![draft.clone(), ready.clone()]);

        let counts = store.status_counts();
        assert_eq!(counts, StatusCounts { draft: 1, ready: 1, exported: 0 });
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_journal_records_lifecycle() {
        let mut store = create_test_store();
        let id = create_valid_declaration(&mut store);
        validate_and_record(&mut store, &id);
        store.record_export(&id, "<ASYCUDA/>".to_string()).unwrap();

        let events = store.take_events();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["declaration_created", "declaration_validated", "declaration_exported"]
        );
        assert!(events.iter().all(|e| e.entity_id == id));
        assert!(store.take_events().is_empty());
    }
}
