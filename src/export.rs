// 📤 Export - hand a Ready declaration to a wire-format serializer
//
// The serializer (ASYCUDA XML or anything else) lives outside this crate.
// This module only gates on the validation report and records the output.

use crate::declaration::Declaration;
use crate::store::{export_not_allowed, DeclarationStore, StoreError};

/// Turns a declaration into its wire format
pub trait DeclarationSerializer {
    fn serialize(&self, declaration: &Declaration) -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serializer failed for declaration {id}: {source}")]
    Serializer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Serialize a validated declaration and record the output in the store
///
/// Fails without touching the store when the declaration is unknown, is not
/// Ready with a passing report, or the serializer errors.
pub fn export_declaration(
    store: &mut DeclarationStore,
    id: &str,
    serializer: &dyn DeclarationSerializer,
) -> Result<String, ExportError> {
    let declaration = store
        .get_declaration(id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    if !declaration.is_exportable() {
        return Err(export_not_allowed(id).into());
    }

    let output = serializer
        .serialize(&declaration)
        .map_err(|source| ExportError::Serializer {
            id: id.to_string(),
            source,
        })?;

    store.record_export(id, output.clone())?;
    Ok(output)
}

/// Download name for an exported declaration
pub fn export_file_name(declaration: &Declaration) -> String {
    format!("{}.xml", declaration.reference_number)
}

// ============================================================================
// TESTS
// ============================================================================
