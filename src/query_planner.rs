use async_trait::async_trait;
use graphql_parser::query::{
    Definition, OperationDefinition, Selection, Value as AstValue, parse_query,
};
use serde_json::{Map, Number, Value};

use crate::FederatedSchemaConfiguration;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// One top-level field to resolve, with its arguments already converted
/// to plain JSON.
#[derive(Debug)]
pub struct FieldInvocation {
    /// Response key: the alias when given, the field name otherwise.
    pub alias: String,
    pub field_name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Debug)]
pub struct QueryPlan {
    pub kind: OperationKind,
    pub invocations: Vec<FieldInvocation>,
}

#[async_trait]
pub trait QueryPlanner {
    async fn plan_query(
        &self,
        query: &str,
        schema: &FederatedSchemaConfiguration,
        variables: Option<&Value>,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, GatewayError>;
}

/// Maps each top-level field of the selected operation to a federated
/// field. Nested selections are accepted but not used to trim the REST
/// response; that is the downstream execution layer's concern.
pub struct SimpleQueryPlanner;

impl SimpleQueryPlanner {
    pub fn new() -> Self {
        SimpleQueryPlanner
    }
}

impl Default for SimpleQueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for SimpleQueryPlanner {
    async fn plan_query(
        &self,
        query: &str,
        schema: &FederatedSchemaConfiguration,
        variables: Option<&Value>,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, GatewayError> {
        let document = parse_query::<String>(query)
            .map_err(|e| GatewayError::QueryParse(e.to_string()))?;

        let operations: Vec<&OperationDefinition<'_, String>> = document
            .definitions
            .iter()
            .filter_map(|def| match def {
                Definition::Operation(op) => Some(op),
                Definition::Fragment(_) => None,
            })
            .collect();

        let operation = match operation_name {
            Some(wanted) => operations
                .iter()
                .find(|op| declared_name(op).is_some_and(|n| n == wanted))
                .copied()
                .ok_or_else(|| GatewayError::UnknownOperation(wanted.to_string()))?,
            None => *operations.first().ok_or(GatewayError::EmptyDocument)?,
        };

        let (kind, selection_set, variable_definitions) = match operation {
            OperationDefinition::SelectionSet(set) => (OperationKind::Query, set, None),
            OperationDefinition::Query(q) => (
                OperationKind::Query,
                &q.selection_set,
                Some(&q.variable_definitions),
            ),
            OperationDefinition::Mutation(m) => (
                OperationKind::Mutation,
                &m.selection_set,
                Some(&m.variable_definitions),
            ),
            OperationDefinition::Subscription(_) => {
                return Err(GatewayError::QueryParse(
                    "subscriptions are not supported".to_string(),
                ));
            }
        };

        let variables = resolve_variables(variables, variable_definitions)?;

        let fields = match kind {
            OperationKind::Query => &schema.query_fields,
            OperationKind::Mutation => &schema.mutation_fields,
        };

        let mut invocations = Vec::new();
        for selection in &selection_set.items {
            let Selection::Field(field) = selection else {
                return Err(GatewayError::QueryParse(
                    "fragments are not supported at the operation root".to_string(),
                ));
            };
            if !fields.contains_key(&field.name) {
                return Err(GatewayError::UnknownField(field.name.clone()));
            }

            let mut arguments = Map::new();
            for (name, value) in &field.arguments {
                arguments.insert(name.clone(), convert_value(value, &variables)?);
            }
            invocations.push(FieldInvocation {
                alias: field.alias.clone().unwrap_or_else(|| field.name.clone()),
                field_name: field.name.clone(),
                arguments,
            });
        }

        if invocations.is_empty() {
            return Err(GatewayError::EmptyDocument);
        }
        Ok(QueryPlan { kind, invocations })
    }
}

fn declared_name<'a>(op: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match op {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

/// Provided variables merged with declared defaults for the ones missing.
fn resolve_variables<'a>(
    provided: Option<&Value>,
    definitions: Option<&Vec<graphql_parser::query::VariableDefinition<'a, String>>>,
) -> Result<Map<String, Value>, GatewayError> {
    let mut variables = provided
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(definitions) = definitions {
        let empty = Map::new();
        for def in definitions {
            if variables.contains_key(&def.name) {
                continue;
            }
            if let Some(default) = &def.default_value {
                variables.insert(def.name.clone(), convert_value(default, &empty)?);
            }
        }
    }
    Ok(variables)
}

fn convert_value(
    value: &AstValue<'_, String>,
    variables: &Map<String, Value>,
) -> Result<Value, GatewayError> {
    Ok(match value {
        AstValue::Variable(name) => variables
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UndefinedVariable(name.clone()))?,
        AstValue::Int(n) => n
            .as_i64()
            .map(|i| Value::Number(Number::from(i)))
            .unwrap_or(Value::Null),
        AstValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        AstValue::String(s) => Value::String(s.clone()),
        AstValue::Boolean(b) => Value::Bool(*b),
        AstValue::Null => Value::Null,
        AstValue::Enum(e) => Value::String(e.clone()),
        AstValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| convert_value(item, variables))
                .collect::<Result<_, _>>()?,
        ),
        AstValue::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), convert_value(v, variables)?);
            }
            Value::Object(out)
        }
    })
}
