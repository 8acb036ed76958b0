//! Map AST node types

use serde::{Deserialize, Serialize};

use super::{AstMetadata, DocumentVersion};
use crate::{Error, ErrorReport, Result};

/// A parsed map document (`*.suma.ast.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", rename = "MapDocument")]
pub struct MapDocument {
    /// Compiler metadata
    pub ast_metadata: AstMetadata,
    /// Document header
    pub header: MapHeader,
    /// Use case maps and operations
    pub definitions: Vec<MapDocumentDefinition>,
}

impl MapDocument {
    /// Parse a map document from JSON, checking the `kind` discriminant and
    /// AST version.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(source).map_err(|e| {
            Error::Bind(
                ErrorReport::new("Failed to parse map AST")
                    .detail(e.to_string())
                    .hint("Recompile the map or clear the parsed-AST cache"),
            )
        })?;
        document.ast_metadata.check_version("map")?;
        Ok(document)
    }

    /// The profile id this map implements (`scope/name`).
    pub fn profile_id(&self) -> String {
        match &self.header.profile.scope {
            Some(scope) => format!("{scope}/{}", self.header.profile.name),
            None => self.header.profile.name.clone(),
        }
    }

    /// The provider this map targets.
    pub fn provider_name(&self) -> &str {
        &self.header.provider
    }

    /// Find the map implementing a use case.
    pub fn map_for_use_case(&self, name: &str) -> Option<&MapDefinition> {
        self.definitions.iter().find_map(|definition| match definition {
            MapDocumentDefinition::Map(map) if map.usecase_name == name => Some(map),
            _ => None,
        })
    }

    /// Find an operation by name.
    pub fn operation(&self, name: &str) -> Option<&OperationDefinition> {
        self.definitions.iter().find_map(|definition| match definition {
            MapDocumentDefinition::Operation(operation) if operation.name == name => {
                Some(operation)
            }
            _ => None,
        })
    }
}

/// Map document header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapHeader {
    /// Implemented profile reference
    pub profile: MapProfileReference,
    /// Provider this map targets
    pub provider: String,
    /// Optional map variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Profile reference in a map header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapProfileReference {
    /// Optional profile scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Profile name
    pub name: String,
    /// Profile version the map was written against
    pub version: DocumentVersion,
}

/// Top-level map definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MapDocumentDefinition {
    /// A use case implementation
    #[serde(rename = "MapDefinition")]
    Map(MapDefinition),
    /// A reusable operation
    #[serde(rename = "OperationDefinition")]
    Operation(OperationDefinition),
}

/// A use case implementation: a named sequence of statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDefinition {
    /// Definition name
    pub name: String,
    /// Use case this map implements
    pub usecase_name: String,
    /// Statement sequence
    #[serde(default)]
    pub statements: Vec<Statement>,
}

/// A reusable operation callable from maps and other operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDefinition {
    /// Operation name
    pub name: String,
    /// Statement sequence
    #[serde(default)]
    pub statements: Vec<Statement>,
}

/// Statements executed by the interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Statement {
    /// Variable assignments
    #[serde(rename = "SetStatement")]
    Set {
        /// Assignments applied in order
        assignments: Vec<Assignment>,
    },
    /// Conditional block
    #[serde(rename = "ConditionedStatement")]
    Condition {
        /// Guard expression
        condition: Expression,
        /// Body, executed when the guard is truthy
        #[serde(default)]
        statements: Vec<Statement>,
    },
    /// `foreach` block
    #[serde(rename = "IterationStatement", rename_all = "camelCase")]
    Iteration {
        /// Loop variable name; overwritten (never merged) per iteration
        iteration_variable: String,
        /// Iterated expression
        iterable: Expression,
        /// Body, executed once per element
        #[serde(default)]
        statements: Vec<Statement>,
    },
    /// HTTP call with response handlers
    #[serde(rename = "HttpCallStatement")]
    Http(HttpCallStatement),
    /// Operation call
    #[serde(rename = "CallStatement")]
    Call(CallStatement),
    /// `map result` / `map error` / `return` / `fail`
    #[serde(rename = "OutcomeStatement")]
    Outcome(OutcomeStatement),
}

/// A single assignment of an expression to a (possibly nested) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Key path (`["address", "street"]` assigns `address.street`)
    pub key: Vec<String>,
    /// Assigned expression
    pub value: Expression,
}

/// Expressions embedded in statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expression {
    /// Literal scalar
    #[serde(rename = "PrimitiveLiteral")]
    Primitive {
        /// The literal value
        value: serde_json::Value,
    },
    /// Object literal built from assignments
    #[serde(rename = "ObjectLiteral")]
    Object {
        /// Field assignments
        #[serde(default)]
        fields: Vec<Assignment>,
    },
    /// Embedded script expression, evaluated in the sandbox
    #[serde(rename = "JessieExpression")]
    Jessie {
        /// Expression source text
        expression: String,
    },
    /// Inline operation call used in expression position
    #[serde(rename = "InlineCall", rename_all = "camelCase")]
    InlineCall {
        /// Called operation
        operation_name: String,
        /// Call arguments
        #[serde(default)]
        arguments: Vec<Assignment>,
    },
}

/// HTTP call statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCallStatement {
    /// HTTP method
    pub method: String,
    /// Path relative to the selected service (`/characters/{id}`)
    pub url: String,
    /// Request description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HttpRequestNode>,
    /// Response handlers, matched in order
    #[serde(default)]
    pub response_handlers: Vec<HttpResponseHandler>,
}

/// Request portion of an HTTP call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestNode {
    /// Declared request content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Declared request content language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    /// Query parameter assignments
    #[serde(default)]
    pub query: Vec<Assignment>,
    /// Header assignments
    #[serde(default)]
    pub headers: Vec<Assignment>,
    /// Request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Expression>,
    /// Security requirements applied to this call
    #[serde(default)]
    pub security: Vec<SecurityRequirement>,
    /// Service whose base URL the call targets; `None` uses the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

/// Reference to a security scheme by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRequirement {
    /// Security scheme id
    pub id: String,
}

/// One response handler of an HTTP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseHandler {
    /// Match on exact status code; `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Match on response content type prefix; `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Match on response content language; `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    /// Handler body, run with `body`, `headers`, `statusCode` in scope
    #[serde(default)]
    pub statements: Vec<Statement>,
}

/// Operation call statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatement {
    /// Called operation
    pub operation_name: String,
    /// Call arguments, evaluated in the caller's scope
    #[serde(default)]
    pub arguments: Vec<Assignment>,
    /// Statements run after the call with `outcome` in scope
    #[serde(default)]
    pub statements: Vec<Statement>,
}

/// Outcome statement: sets the frame's result or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeStatement {
    /// Optional guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
    /// True for `map error` / `fail`
    pub is_error: bool,
    /// True for `return` / `fail`: terminate the enclosing definition
    pub terminate_flow: bool,
    /// Outcome value
    pub value: Expression,
}
