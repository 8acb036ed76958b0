//! Profile AST node types

use serde::{Deserialize, Serialize};

use super::{AstMetadata, DocumentVersion};
use crate::{Error, ErrorReport, Result};

/// A parsed profile document (`*.supr.ast.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", rename = "ProfileDocument")]
pub struct ProfileDocument {
    /// Compiler metadata
    pub ast_metadata: AstMetadata,
    /// Document header
    pub header: ProfileHeader,
    /// Use cases, named models, and named fields
    pub definitions: Vec<ProfileDefinition>,
}

impl ProfileDocument {
    /// Parse a profile document from JSON, checking the `kind` discriminant
    /// and AST version.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(source).map_err(|e| {
            Error::Bind(
                ErrorReport::new("Failed to parse profile AST")
                    .detail(e.to_string())
                    .hint("Recompile the profile or clear the parsed-AST cache"),
            )
        })?;
        document.ast_metadata.check_version("profile")?;
        Ok(document)
    }

    /// The profile id this document declares (`scope/name`).
    pub fn profile_id(&self) -> String {
        match &self.header.scope {
            Some(scope) => format!("{scope}/{}", self.header.name),
            None => self.header.name.clone(),
        }
    }

    /// Find a use case by name.
    pub fn use_case(&self, name: &str) -> Option<&UseCaseDefinition> {
        self.definitions.iter().find_map(|definition| match definition {
            ProfileDefinition::UseCase(use_case) if use_case.use_case_name == name => {
                Some(use_case)
            }
            _ => None,
        })
    }

    /// Find a named model definition.
    pub fn named_model(&self, name: &str) -> Option<&TypeNode> {
        self.definitions.iter().find_map(|definition| match definition {
            ProfileDefinition::NamedModel(model) if model.model_name == name => {
                model.model_type.as_ref()
            }
            _ => None,
        })
    }

    /// Find a named field definition.
    pub fn named_field(&self, name: &str) -> Option<&TypeNode> {
        self.definitions.iter().find_map(|definition| match definition {
            ProfileDefinition::NamedField(field) if field.field_name == name => {
                field.field_type.as_ref()
            }
            _ => None,
        })
    }
}

/// Profile document header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileHeader {
    /// Optional scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Profile name
    pub name: String,
    /// Profile version
    pub version: DocumentVersion,
}

/// Top-level profile definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProfileDefinition {
    /// A use case with input and result shapes
    #[serde(rename = "UseCaseDefinition")]
    UseCase(UseCaseDefinition),
    /// A reusable named model
    #[serde(rename = "NamedModelDefinition")]
    NamedModel(NamedModelDefinition),
    /// A reusable named field
    #[serde(rename = "NamedFieldDefinition")]
    NamedField(NamedFieldDefinition),
}

/// Safety classification of a use case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCaseSafety {
    /// No observable side effects
    Safe,
    /// Side effects, not safely repeatable
    #[default]
    Unsafe,
    /// Side effects, safely repeatable
    Idempotent,
}

/// A use case definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCaseDefinition {
    /// Use case name
    pub use_case_name: String,
    /// Safety classification
    #[serde(default)]
    pub safety: UseCaseSafety,
    /// Input shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<UseCaseSlot>,
    /// Result shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UseCaseSlot>,
    /// Error shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UseCaseSlot>,
}

/// A slot (input/result/error) holding a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCaseSlot {
    /// The slot's type
    pub value: TypeNode,
}

/// A named model definition (`model Address { ... }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedModelDefinition {
    /// Model name
    pub model_name: String,
    /// Model type; `None` models an opaque declaration
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub model_type: Option<TypeNode>,
}

/// A named field definition (`field street string`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedFieldDefinition {
    /// Field name
    pub field_name: String,
    /// Field type; `None` models an untyped declaration
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<TypeNode>,
}

/// Algebraic type nodes used by use case shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeNode {
    /// Primitive scalar type
    #[serde(rename = "PrimitiveTypeName")]
    Primitive {
        /// One of `string`, `number`, `boolean`
        name: PrimitiveTypeName,
    },
    /// Reference to a named model
    #[serde(rename = "ModelTypeName")]
    ModelReference {
        /// Referenced model name
        name: String,
    },
    /// Object with fields
    #[serde(rename = "ObjectDefinition")]
    Object {
        /// Field definitions
        #[serde(default)]
        fields: Vec<FieldDefinition>,
    },
    /// Homogeneous list
    #[serde(rename = "ListDefinition", rename_all = "camelCase")]
    List {
        /// Element type
        element_type: Box<TypeNode>,
    },
    /// Union of alternatives
    #[serde(rename = "UnionDefinition")]
    Union {
        /// Alternative types
        types: Vec<TypeNode>,
    },
    /// Enumeration of literal values
    #[serde(rename = "EnumDefinition")]
    Enum {
        /// Allowed values
        values: Vec<EnumValue>,
    },
    /// Non-null wrapper
    #[serde(rename = "NonNullDefinition", rename_all = "camelCase")]
    NonNull {
        /// Inner type
        #[serde(rename = "type")]
        inner: Box<TypeNode>,
    },
}

/// Primitive type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveTypeName {
    /// UTF-8 string
    String,
    /// Integer or float
    Number,
    /// Boolean
    Boolean,
}

/// A field inside an object definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Field name
    pub field_name: String,
    /// Whether the field must be present
    #[serde(default)]
    pub required: bool,
    /// Field type; `None` defers to a named field definition
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<Box<TypeNode>>,
}

/// One allowed value of an enum definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumValue {
    /// The literal value
    pub value: serde_json::Value,
}
