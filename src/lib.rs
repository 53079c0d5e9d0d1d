// Customs Declarations - Core Library
// Declaration model, validation gate, store state machine, export + persistence

pub mod config;
pub mod db;
pub mod declaration;
pub mod export;
pub mod reference;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    Event, Snapshot, SnapshotInfo,
    open_database, setup_database, save_snapshot, load_snapshot, get_snapshot_info,
    save_store, load_store,
    insert_event, insert_events, get_events_for_entity,
};
pub use declaration::{
    Declaration, DeclarationItem, DeclarationPayload, DeclarationStatus, Section,
    IdentificationData, DeclarantData, TradersData, ValuationData,
};
pub use export::{DeclarationSerializer, ExportError, export_declaration, export_file_name};
pub use reference::{
    DatedReferenceGenerator, IdGenerator, ReferenceGenerator, UuidGenerator,
};
pub use store::{DeclarationStore, StatusCounts, StoreError};
pub use validation::{
    ReportStatus, ValidationError, ValidationReport, Validator,
    validate, field_error, has_field_error, section_errors, section_has_errors, field_label,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
