//! Map interpreter
//!
//! Walks a map definition statement by statement against an execution
//! frame. Embedded expressions evaluate in the sandbox, HTTP calls go
//! through the HTTP client (and therefore the event hub), and outcomes
//! assemble the frame's result or error. Operations run in fresh frames;
//! callee variables never leak back into the caller.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::ast::{
    Assignment, CallStatement, Expression, HttpCallStatement, MapDocument, OutcomeStatement,
    Statement,
};
use crate::events::{EventContext, EventHub, UnhandledHttpDecision};
use crate::http::{DigestCache, HttpClient, HttpRequestOptions, SecurityConfiguration};
use crate::sandbox::Sandbox;
use crate::values::{Variable, Variables, merge_variables};
use crate::{Error, ErrorReport, Result};

/// Provider-side resources one perform executes against.
#[derive(Clone)]
pub struct ProviderResources {
    /// Provider name, for diagnostics
    pub provider_name: String,
    /// Base URLs by service id
    pub service_base_urls: HashMap<String, String>,
    /// Service used when a map does not pick one
    pub default_service_id: String,
    /// Resolved security configurations
    pub security: Vec<SecurityConfiguration>,
    /// Resolved integration parameters
    pub integration_parameters: HashMap<String, String>,
    /// Digest challenge cache shared across this provider's requests
    pub digest_cache: Arc<DigestCache>,
}

/// One execution frame: variables plus the outcome being assembled.
#[derive(Debug, Default)]
struct Frame {
    variables: Variables,
    result: Option<Variable>,
    error: Option<Variable>,
    /// Status code of the response whose handler set the error, if any
    error_status: Option<u16>,
}

/// Control flow signal of statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Keep executing the current statement sequence
    Continue,
    /// `return` / `fail`: exit loops and the enclosing definition
    Terminate,
}

/// Interpreter over one map document.
pub struct MapInterpreter<'a> {
    map: &'a MapDocument,
    resources: &'a ProviderResources,
    http: &'a HttpClient,
    hub: &'a EventHub,
    sandbox: Sandbox,
    context: EventContext,
}

impl<'a> MapInterpreter<'a> {
    /// Create an interpreter bound to a map and provider resources.
    pub fn new(
        map: &'a MapDocument,
        resources: &'a ProviderResources,
        http: &'a HttpClient,
        hub: &'a EventHub,
        sandbox: Sandbox,
        context: EventContext,
    ) -> Self {
        Self {
            map,
            resources,
            http,
            hub,
            sandbox,
            context,
        }
    }

    /// Execute the map for a use case with validated input.
    pub async fn perform(&self, usecase_name: &str, input: Variables) -> Result<Variable> {
        let definition = self.map.map_for_use_case(usecase_name).ok_or_else(|| {
            Error::MapAst(
                ErrorReport::new(format!(
                    "Map for provider '{}' does not implement use case '{usecase_name}'",
                    self.resources.provider_name
                ))
                .detail(format!("Map document: {}", self.map.profile_id())),
            )
        })?;

        let mut frame = Frame {
            variables: self.builtin_variables(Some(input)),
            ..Frame::default()
        };

        self.execute_statements(&mut frame, &definition.statements)
            .await?;

        match (frame.error, frame.error_status) {
            (Some(error), Some(status_code)) => Err(Error::MappedHttp { status_code, error }),
            (Some(error), None) => Err(Error::Mapped { error }),
            (None, _) => Ok(frame.result.unwrap_or(Variable::None)),
        }
    }

    /// Variables every frame starts with.
    fn builtin_variables(&self, input: Option<Variables>) -> Variables {
        let mut variables = Variables::new();
        if let Some(input) = input {
            variables.insert("input".to_string(), Variable::Map(input));
        }
        variables.insert(
            "parameters".to_string(),
            Variable::Map(
                self.resources
                    .integration_parameters
                    .iter()
                    .map(|(key, value)| (key.clone(), Variable::String(value.clone())))
                    .collect(),
            ),
        );
        variables
    }

    fn execute_statements<'f>(
        &'f self,
        frame: &'f mut Frame,
        statements: &'f [Statement],
    ) -> BoxFuture<'f, Result<Flow>> {
        Box::pin(async move {
            for statement in statements {
                match self.execute_statement(frame, statement).await? {
                    Flow::Continue => {}
                    Flow::Terminate => return Ok(Flow::Terminate),
                }
            }
            Ok(Flow::Continue)
        })
    }

    fn execute_statement<'f>(
        &'f self,
        frame: &'f mut Frame,
        statement: &'f Statement,
    ) -> BoxFuture<'f, Result<Flow>> {
        Box::pin(async move {
            match statement {
                Statement::Set { assignments } => {
                    let object = self.eval_assignments(assignments, &frame.variables).await?;
                    merge_variables(&mut frame.variables, object);
                    Ok(Flow::Continue)
                }
                Statement::Condition {
                    condition,
                    statements,
                } => {
                    let guard = self.eval_expression(condition, &frame.variables).await?;
                    if guard.is_truthy() {
                        self.execute_statements(frame, statements).await
                    } else {
                        Ok(Flow::Continue)
                    }
                }
                Statement::Iteration {
                    iteration_variable,
                    iterable,
                    statements,
                } => {
                    self.execute_iteration(frame, iteration_variable, iterable, statements)
                        .await
                }
                Statement::Http(http_call) => self.execute_http(frame, http_call).await,
                Statement::Call(call) => self.execute_call(frame, call).await,
                Statement::Outcome(outcome) => self.execute_outcome(frame, outcome).await,
            }
        })
    }

    async fn execute_iteration(
        &self,
        frame: &mut Frame,
        iteration_variable: &str,
        iterable: &Expression,
        statements: &[Statement],
    ) -> Result<Flow> {
        let iterated = self.eval_expression(iterable, &frame.variables).await?;
        let items: Vec<Variable> = match iterated {
            Variable::List(items) => items,
            Variable::Map(map) => map.into_values().collect(),
            Variable::None => Vec::new(),
            other => {
                return Err(Error::MapAst(
                    ErrorReport::new("foreach requires a list or object").detail(format!(
                        "Iterated expression produced {other:?}"
                    )),
                ));
            }
        };

        for item in items {
            // The loop variable is overwritten per iteration, never merged:
            // properties set on it in one iteration are not observable in
            // the next
            frame
                .variables
                .insert(iteration_variable.to_string(), item);
            match self.execute_statements(frame, statements).await? {
                Flow::Continue => {}
                Flow::Terminate => return Ok(Flow::Terminate),
            }
        }
        Ok(Flow::Continue)
    }

    async fn execute_outcome(&self, frame: &mut Frame, outcome: &OutcomeStatement) -> Result<Flow> {
        if let Some(condition) = &outcome.condition {
            let guard = self.eval_expression(condition, &frame.variables).await?;
            if !guard.is_truthy() {
                return Ok(Flow::Continue);
            }
        }

        let value = self.eval_expression(&outcome.value, &frame.variables).await?;
        if outcome.is_error {
            frame.error = Some(value);
        } else {
            frame.result = Some(value);
        }

        if outcome.terminate_flow {
            Ok(Flow::Terminate)
        } else {
            Ok(Flow::Continue)
        }
    }

    /// Execute an operation in a fresh frame and return its outcome as
    /// `(data, error)`.
    async fn invoke_operation(
        &self,
        operation_name: &str,
        arguments: &[Assignment],
        caller_variables: &Variables,
    ) -> Result<(Option<Variable>, Option<Variable>)> {
        let operation = self.map.operation(operation_name).ok_or_else(|| {
            Error::MapAst(ErrorReport::new(format!(
                "Operation not found: {operation_name}"
            )))
        })?;

        let args = self.eval_assignments(arguments, caller_variables).await?;

        let mut callee = Frame {
            variables: self.builtin_variables(None),
            ..Frame::default()
        };
        callee
            .variables
            .insert("args".to_string(), Variable::Map(args));

        debug!(operation = operation_name, "Calling operation");
        self.execute_statements(&mut callee, &operation.statements)
            .await?;

        Ok((callee.result, callee.error))
    }

    async fn execute_call(&self, frame: &mut Frame, call: &CallStatement) -> Result<Flow> {
        let (data, error) = self
            .invoke_operation(&call.operation_name, &call.arguments, &frame.variables)
            .await?;

        // The callee's outcome is exposed to the caller as `outcome`; a
        // failing callee does not throw across frames
        let mut outcome = Variables::new();
        outcome.insert("data".to_string(), data.unwrap_or(Variable::None));
        outcome.insert("error".to_string(), error.unwrap_or(Variable::None));
        frame
            .variables
            .insert("outcome".to_string(), Variable::Map(outcome));

        self.execute_statements(frame, &call.statements).await
    }

    async fn execute_http(&self, frame: &mut Frame, http_call: &HttpCallStatement) -> Result<Flow> {
        loop {
            let response = self.issue_request(frame, http_call).await?;

            let handler = http_call.response_handlers.iter().find(|handler| {
                let status_matches = handler
                    .status_code
                    .is_none_or(|expected| expected == response.status_code);
                let content_matches = handler.content_type.as_deref().is_none_or(|expected| {
                    response
                        .content_type()
                        .is_some_and(|actual| actual.starts_with(expected))
                });
                status_matches && content_matches
            });

            if let Some(handler) = handler {
                frame
                    .variables
                    .insert("body".to_string(), response.body_variable()?);
                frame
                    .variables
                    .insert("headers".to_string(), response.headers_variable());
                frame.variables.insert(
                    "statusCode".to_string(),
                    Variable::Number(i64::from(response.status_code).into()),
                );

                let had_error = frame.error.is_some();
                let flow = self.execute_statements(frame, &handler.statements).await?;
                if frame.error.is_some() && !had_error {
                    frame.error_status = Some(response.status_code);
                }
                return Ok(flow);
            }

            if response.status_code >= 400 {
                match self
                    .hub
                    .dispatch_unhandled_http(&self.context, response.status_code)
                {
                    UnhandledHttpDecision::Continue => {
                        return Err(Error::Http {
                            status_code: response.status_code,
                            report: ErrorReport::new(format!(
                                "HTTP call failed with status {}",
                                response.status_code
                            ))
                            .detail(format!(
                                "No response handler matched for {} {}",
                                http_call.method, http_call.url
                            )),
                        });
                    }
                    UnhandledHttpDecision::Retry => {
                        debug!("Retrying HTTP call after unhandled status");
                        continue;
                    }
                    UnhandledHttpDecision::Abort(error) => return Err(error),
                }
            }

            return Ok(Flow::Continue);
        }
    }

    async fn issue_request(
        &self,
        frame: &Frame,
        http_call: &HttpCallStatement,
    ) -> Result<crate::http::FetchResponse> {
        let request = http_call.request.clone().unwrap_or_default();

        let query = self
            .eval_assignments_flat(&request.query, &frame.variables)
            .await?;
        let headers = self
            .eval_assignments_flat(&request.headers, &frame.variables)
            .await?;
        let body = match &request.body {
            Some(expression) => Some(self.eval_expression(expression, &frame.variables).await?),
            None => None,
        };

        let security = request
            .security
            .iter()
            .map(|requirement| {
                self.resources
                    .security
                    .iter()
                    .find(|configuration| configuration.id() == requirement.id)
                    .cloned()
                    .ok_or_else(|| {
                        Error::MapAst(ErrorReport::new(format!(
                            "Map requires security scheme '{}' which is not configured",
                            requirement.id
                        )))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let options = HttpRequestOptions {
            method: http_call.method.clone(),
            headers,
            query,
            body,
            content_type: request.content_type.clone(),
            security,
            path_parameters: frame.variables.clone(),
            service_base_urls: self.resources.service_base_urls.clone(),
            default_service_id: self.resources.default_service_id.clone(),
            service_id: request.service_id.clone(),
            digest_cache: Some(Arc::clone(&self.resources.digest_cache)),
        };

        self.http
            .request(&self.context, &http_call.url, options)
            .await
    }

    /// Evaluate assignments into a nested object.
    async fn eval_assignments(
        &self,
        assignments: &[Assignment],
        variables: &Variables,
    ) -> Result<Variables> {
        let mut object = Variables::new();
        for assignment in assignments {
            let value = self.eval_expression(&assignment.value, variables).await?;
            assign_segments(&mut object, &assignment.key, value);
        }
        Ok(object)
    }

    /// Evaluate assignments into flat name/value pairs, omitting undefined
    /// values (used for query parameters and headers).
    async fn eval_assignments_flat(
        &self,
        assignments: &[Assignment],
        variables: &Variables,
    ) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for assignment in assignments {
            let value = self.eval_expression(&assignment.value, variables).await?;
            let name = assignment.key.join(".");
            match value {
                Variable::None => {}
                Variable::String(s) => pairs.push((name, s)),
                Variable::Number(n) => pairs.push((name, n.to_string())),
                Variable::Bool(b) => pairs.push((name, b.to_string())),
                other => pairs.push((name, serde_json::Value::from(&other).to_string())),
            }
        }
        Ok(pairs)
    }

    fn eval_expression<'f>(
        &'f self,
        expression: &'f Expression,
        variables: &'f Variables,
    ) -> BoxFuture<'f, Result<Variable>> {
        Box::pin(async move {
            match expression {
                Expression::Primitive { value } => Ok(Variable::from(value.clone())),
                Expression::Jessie { expression } => self.sandbox.eval(expression, variables),
                Expression::Object { fields } => {
                    Ok(Variable::Map(self.eval_assignments(fields, variables).await?))
                }
                Expression::InlineCall {
                    operation_name,
                    arguments,
                } => {
                    let (data, error) = self
                        .invoke_operation(operation_name, arguments, variables)
                        .await?;
                    // An inline call has nowhere to surface a partial
                    // outcome, so a failed operation fails the map
                    match error {
                        Some(error) => Err(Error::Mapped { error }),
                        None => Ok(data.unwrap_or(Variable::None)),
                    }
                }
            }
        })
    }
}

/// Assign a value at a key path, merging intermediate maps.
fn assign_segments(target: &mut Variables, segments: &[String], value: Variable) {
    let Some((leaf, path)) = segments.split_last() else {
        return;
    };

    let mut nested = Variables::new();
    nested.insert(leaf.clone(), value);
    for segment in path.iter().rev() {
        let mut outer = Variables::new();
        outer.insert(segment.clone(), Variable::Map(nested));
        nested = outer;
    }
    merge_variables(target, nested);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::values::variables_from_json;

    fn map_document(definitions: serde_json::Value) -> MapDocument {
        MapDocument::from_json_str(
            &json!({
                "kind": "MapDocument",
                "astMetadata": {
                    "astVersion": {"major": 1, "minor": 0, "patch": 0},
                    "sourceChecksum": "abc"
                },
                "header": {
                    "profile": {"name": "example", "version": {"major": 1, "minor": 0, "patch": 0}},
                    "provider": "test"
                },
                "definitions": definitions
            })
            .to_string(),
        )
        .unwrap()
    }

    fn resources() -> ProviderResources {
        ProviderResources {
            provider_name: "test".to_string(),
            service_base_urls: HashMap::from([(
                "default".to_string(),
                "https://example.com".to_string(),
            )]),
            default_service_id: "default".to_string(),
            security: Vec::new(),
            integration_parameters: HashMap::from([(
                "region".to_string(),
                "eu".to_string(),
            )]),
            digest_cache: Arc::new(DigestCache::new()),
        }
    }

    async fn run(
        definitions: serde_json::Value,
        usecase: &str,
        input: serde_json::Value,
    ) -> Result<Variable> {
        let map = map_document(definitions);
        let resources = resources();
        let hub = Arc::new(EventHub::new());
        let http = HttpClient::new(Arc::clone(&hub)).unwrap();
        let interpreter = MapInterpreter::new(
            &map,
            &resources,
            &http,
            &hub,
            Sandbox::default(),
            EventContext::default(),
        );
        interpreter
            .perform(usecase, variables_from_json(input).unwrap())
            .await
    }

    fn jessie(expression: &str) -> serde_json::Value {
        json!({"kind": "JessieExpression", "expression": expression})
    }

    #[tokio::test]
    async fn set_and_outcome_produce_a_result() {
        let result = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "SetStatement", "assignments": [
                        {"key": ["doubled"], "value": jessie("input.value * 2")}
                    ]},
                    {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                     "value": jessie("doubled")}
                ]
            }]),
            "Test",
            json!({"value": 21}),
        )
        .await
        .unwrap();

        assert_eq!(result, Variable::from(42));
    }

    #[tokio::test]
    async fn nested_set_keys_build_objects() {
        let result = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "SetStatement", "assignments": [
                        {"key": ["address", "city"], "value": {"kind": "PrimitiveLiteral", "value": "Prague"}},
                        {"key": ["address", "zip"], "value": {"kind": "PrimitiveLiteral", "value": "11000"}}
                    ]},
                    {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                     "value": jessie("address")}
                ]
            }]),
            "Test",
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(
            serde_json::Value::from(result),
            json!({"city": "Prague", "zip": "11000"})
        );
    }

    #[tokio::test]
    async fn condition_skips_body_when_falsy() {
        let result = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "SetStatement", "assignments": [
                        {"key": ["picked"], "value": {"kind": "PrimitiveLiteral", "value": "default"}}
                    ]},
                    {"kind": "ConditionedStatement", "condition": jessie("input.flag"), "statements": [
                        {"kind": "SetStatement", "assignments": [
                            {"key": ["picked"], "value": {"kind": "PrimitiveLiteral", "value": "flagged"}}
                        ]}
                    ]},
                    {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                     "value": jessie("picked")}
                ]
            }]),
            "Test",
            json!({"flag": false}),
        )
        .await
        .unwrap();

        assert_eq!(result, Variable::from("default"));
    }

    #[tokio::test]
    async fn foreach_overwrites_the_loop_variable_per_iteration() {
        // Each iteration reads `item.value`; if iterations merged, the
        // `marker` set on the first object would leak into the second
        let result = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "SetStatement", "assignments": [
                        {"key": ["total"], "value": {"kind": "PrimitiveLiteral", "value": 0}}
                    ]},
                    {"kind": "IterationStatement", "iterationVariable": "item",
                     "iterable": jessie("input.items"),
                     "statements": [
                        {"kind": "SetStatement", "assignments": [
                            {"key": ["seenMarker"], "value": jessie("item.marker == true")},
                            {"key": ["item", "marker"], "value": {"kind": "PrimitiveLiteral", "value": true}},
                            {"key": ["total"], "value": jessie("total + item.value")}
                        ]}
                    ]},
                    {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                     "value": jessie("#{total: total, leaked: seenMarker}")}
                ]
            }]),
            "Test",
            json!({"items": [{"value": 1}, {"value": 2}]}),
        )
        .await
        .unwrap();

        assert_eq!(
            serde_json::Value::from(result),
            json!({"total": 3, "leaked": false})
        );
    }

    #[tokio::test]
    async fn terminal_outcome_in_foreach_exits_loop_and_definition() {
        let result = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "IterationStatement", "iterationVariable": "item",
                     "iterable": jessie("input.items"),
                     "statements": [
                        {"kind": "OutcomeStatement", "isError": false, "terminateFlow": true,
                         "value": jessie("item")}
                    ]},
                    {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                     "value": {"kind": "PrimitiveLiteral", "value": "unreachable"}}
                ]
            }]),
            "Test",
            json!({"items": ["first", "second"]}),
        )
        .await
        .unwrap();

        assert_eq!(result, Variable::from("first"));
    }

    #[tokio::test]
    async fn callee_fail_sets_outcome_error_without_throwing() {
        let result = run(
            json!([
                {
                    "kind": "MapDefinition",
                    "name": "Test",
                    "usecaseName": "Test",
                    "statements": [
                        {"kind": "CallStatement", "operationName": "Failing", "arguments": [],
                         "statements": [
                            {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                             "value": jessie("outcome.error")}
                        ]}
                    ]
                },
                {
                    "kind": "OperationDefinition",
                    "name": "Failing",
                    "statements": [
                        {"kind": "OutcomeStatement", "isError": true, "terminateFlow": true,
                         "value": {"kind": "PrimitiveLiteral", "value": "operation failed"}}
                    ]
                }
            ]),
            "Test",
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(result, Variable::from("operation failed"));
    }

    #[tokio::test]
    async fn callee_variables_do_not_leak_into_the_caller() {
        let result = run(
            json!([
                {
                    "kind": "MapDefinition",
                    "name": "Test",
                    "usecaseName": "Test",
                    "statements": [
                        {"kind": "CallStatement", "operationName": "SetsLocal",
                         "arguments": [{"key": ["x"], "value": {"kind": "PrimitiveLiteral", "value": 1}}],
                         "statements": []},
                        {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                         "value": jessie("#{data: outcome.data, local: !is_def_var(\"secret\")}")}
                    ]
                },
                {
                    "kind": "OperationDefinition",
                    "name": "SetsLocal",
                    "statements": [
                        {"kind": "SetStatement", "assignments": [
                            {"key": ["secret"], "value": {"kind": "PrimitiveLiteral", "value": "hidden"}}
                        ]},
                        {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                         "value": jessie("args.x + 1")}
                    ]
                }
            ]),
            "Test",
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(
            serde_json::Value::from(result),
            json!({"data": 2, "local": true})
        );
    }

    #[tokio::test]
    async fn inline_call_returns_data_and_fails_on_error() {
        let ok = run(
            json!([
                {
                    "kind": "MapDefinition",
                    "name": "Test",
                    "usecaseName": "Test",
                    "statements": [
                        {"kind": "SetStatement", "assignments": [
                            {"key": ["value"], "value": {
                                "kind": "InlineCall", "operationName": "Doubles",
                                "arguments": [{"key": ["n"], "value": {"kind": "PrimitiveLiteral", "value": 4}}]
                            }}
                        ]},
                        {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                         "value": jessie("value")}
                    ]
                },
                {
                    "kind": "OperationDefinition",
                    "name": "Doubles",
                    "statements": [
                        {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                         "value": jessie("args.n * 2")}
                    ]
                }
            ]),
            "Test",
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(ok, Variable::from(8));

        let error = run(
            json!([
                {
                    "kind": "MapDefinition",
                    "name": "Test",
                    "usecaseName": "Test",
                    "statements": [
                        {"kind": "SetStatement", "assignments": [
                            {"key": ["value"], "value": {
                                "kind": "InlineCall", "operationName": "Fails", "arguments": []
                            }}
                        ]}
                    ]
                },
                {
                    "kind": "OperationDefinition",
                    "name": "Fails",
                    "statements": [
                        {"kind": "OutcomeStatement", "isError": true, "terminateFlow": true,
                         "value": {"kind": "PrimitiveLiteral", "value": "nope"}}
                    ]
                }
            ]),
            "Test",
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::Mapped { .. }));
    }

    #[tokio::test]
    async fn map_error_outcome_surfaces_as_mapped_error() {
        let error = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "OutcomeStatement", "isError": true, "terminateFlow": false,
                     "value": {"kind": "PrimitiveLiteral", "value": "domain error"}}
                ]
            }]),
            "Test",
            json!({}),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error,
            Error::Mapped { error } if error == Variable::from("domain error")
        ));
    }

    #[tokio::test]
    async fn unknown_use_case_is_a_map_ast_error() {
        let error = run(json!([]), "Missing", json!({})).await.unwrap_err();
        assert!(matches!(error, Error::MapAst(_)));
    }

    #[tokio::test]
    async fn integration_parameters_are_in_scope() {
        let result = run(
            json!([{
                "kind": "MapDefinition",
                "name": "Test",
                "usecaseName": "Test",
                "statements": [
                    {"kind": "OutcomeStatement", "isError": false, "terminateFlow": false,
                     "value": jessie("parameters.region")}
                ]
            }]),
            "Test",
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(result, Variable::from("eu"));
    }
}
