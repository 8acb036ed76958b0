//! Parsed profile and map documents
//!
//! Profiles and maps enter the SDK as `.ast.json` artifacts produced by the
//! authoring compiler. These types mirror that format: every node carries a
//! `kind` discriminant, documents carry `astMetadata` with the checksum of
//! the source they were compiled from.

mod map;
mod profile;

pub use map::{
    Assignment, CallStatement, Expression, HttpCallStatement, HttpRequestNode,
    HttpResponseHandler, MapDefinition, MapDocument, MapDocumentDefinition, MapHeader,
    MapProfileReference, OperationDefinition, OutcomeStatement, SecurityRequirement, Statement,
};
pub use profile::{
    EnumValue, FieldDefinition, NamedFieldDefinition, NamedModelDefinition, PrimitiveTypeName,
    ProfileDefinition, ProfileDocument, ProfileHeader, TypeNode, UseCaseDefinition, UseCaseSafety,
    UseCaseSlot,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// AST format major version this SDK understands.
pub const SUPPORTED_AST_MAJOR: u64 = 1;

/// Version triple used by document headers and AST metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    #[serde(default)]
    pub patch: u64,
    /// Optional prerelease label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Compiler metadata attached to every parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AstMetadata {
    /// Version of the AST format
    pub ast_version: DocumentVersion,
    /// Version of the parser that produced the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_version: Option<String>,
    /// Checksum of the source text the document was compiled from
    pub source_checksum: String,
}

impl AstMetadata {
    /// Check that the AST format is one this SDK can interpret.
    pub(crate) fn check_version(&self, what: &str) -> Result<()> {
        if self.ast_version.major == SUPPORTED_AST_MAJOR {
            Ok(())
        } else {
            Err(Error::map_ast(format!(
                "Unsupported {what} AST version {}.{}.{} (supported major: {SUPPORTED_AST_MAJOR})",
                self.ast_version.major, self.ast_version.minor, self.ast_version.patch
            )))
        }
    }
}
