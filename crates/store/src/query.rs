//! Query translation: structured filters and aggregations to parameterized SQL.
//!
//! Every piece of user-controlled input is bound as a parameter: filter
//! values, JSON paths, limits, offsets, and even the result keys of
//! aggregate rows (via bound `json_object` keys). The only text spliced into
//! SQL is produced from the closed [`FieldType`] set and fixed operator
//! tables.

use crate::error::{FieldIssue, StoreError, StoreResult};
use crate::schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::{FieldDefinition, FieldType};
use uuid::Uuid;

/// One comparison against a document field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

/// A filter clause: one field, one comparison.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

impl FilterClause {
    /// Shorthand for an equality clause.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq(value.into()),
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One order-by term.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Asc
}

/// A list/query request over one collection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentQuery {
    #[serde(default)]
    pub filter: Vec<FilterClause>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// A named aggregation. The function name is carried as text and resolved
/// during translation so unsupported names fail fast.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Aggregation {
    /// Key the result is reported under.
    pub name: String,
    /// Function name: count, sum, avg, min, max.
    pub func: String,
    /// Field the function applies to; optional for count.
    #[serde(default)]
    pub field: Option<String>,
}

/// An aggregation request over one collection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AggregateQuery {
    #[serde(default)]
    pub filter: Vec<FilterClause>,
    #[serde(default)]
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
}

/// Supported aggregation functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            _ => Err(StoreError::UnsupportedAggregation(s.to_string())),
        }
    }
}

/// A value ready to be bound to a parameter slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Bind {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Uuid(Uuid),
}

/// A SQL fragment with its bind values in placeholder order.
#[derive(Debug)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<Bind>,
}

/// Translates structured queries for one collection's declared schema.
pub struct QueryTranslator<'a> {
    fields: &'a [FieldDefinition],
}

impl<'a> QueryTranslator<'a> {
    pub fn new(fields: &'a [FieldDefinition]) -> Self {
        Self { fields }
    }

    /// Look up a declared field; unknown names are an error, never ignored.
    fn field(&self, name: &str) -> StoreResult<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| StoreError::UnknownField(name.to_string()))
    }

    /// SQL expression extracting a field from the payload, with the JSON
    /// path pushed onto `binds`. Numeric fields get a CAST so comparisons
    /// are numeric rather than lexical.
    fn field_expr(&self, field: &FieldDefinition, binds: &mut Vec<Bind>) -> String {
        binds.push(Bind::Text(format!("$.\"{}\"", field.name)));
        match field.field_type {
            FieldType::Integer => "CAST(json_extract(d.payload, ?) AS INTEGER)".to_string(),
            FieldType::Decimal => "CAST(json_extract(d.payload, ?) AS REAL)".to_string(),
            _ => "json_extract(d.payload, ?)".to_string(),
        }
    }

    /// Convert a filter value to a bind, checking it against the declared
    /// type. A malformed value is the caller's error.
    fn value_bind(&self, field: &FieldDefinition, value: &Value) -> StoreResult<Bind> {
        let coerced = schema::coerce(field.field_type, value).map_err(|()| {
            StoreError::Validation(vec![FieldIssue::mismatch(
                field.name.clone(),
                field.field_type,
                schema::json_type_name(value),
            )])
        })?;
        Ok(match coerced {
            Value::String(s) => Bind::Text(s),
            Value::Bool(b) => Bind::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Bind::Int(i)
                } else {
                    Bind::Real(n.as_f64().unwrap_or_default())
                }
            }
            // json-typed fields compare against their serialized form
            other => Bind::Text(other.to_string()),
        })
    }

    /// Render one filter clause into a WHERE conjunct.
    fn clause_sql(&self, clause: &FilterClause, binds: &mut Vec<Bind>) -> StoreResult<String> {
        let field = self.field(&clause.field)?;

        let (op, value) = match &clause.op {
            FilterOp::Eq(v) => ("=", v),
            FilterOp::Ne(v) => ("<>", v),
            FilterOp::Gt(v) => (">", v),
            FilterOp::Gte(v) => (">=", v),
            FilterOp::Lt(v) => ("<", v),
            FilterOp::Lte(v) => ("<=", v),
            FilterOp::In(values) => {
                // Empty IN matches nothing; render a constant, not `IN ()`.
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                let expr = self.field_expr(field, binds);
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    binds.push(self.value_bind(field, value)?);
                    placeholders.push("?");
                }
                return Ok(format!("{expr} IN ({})", placeholders.join(", ")));
            }
            FilterOp::Nin(values) => {
                // Empty NIN matches everything.
                if values.is_empty() {
                    return Ok("1".to_string());
                }
                // Documents without the field are not excluded by NIN, so the
                // NULL case is explicit. Each expression carries its own
                // path placeholder; bind order follows the SQL text.
                let null_expr = self.field_expr(field, binds);
                let expr = self.field_expr(field, binds);
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    binds.push(self.value_bind(field, value)?);
                    placeholders.push("?");
                }
                return Ok(format!(
                    "({null_expr} IS NULL OR {expr} NOT IN ({}))",
                    placeholders.join(", ")
                ));
            }
        };

        let expr = self.field_expr(field, binds);
        binds.push(self.value_bind(field, value)?);
        Ok(format!("{expr} {op} ?"))
    }

    /// WHERE clause for a collection plus filter. Always at least scopes by
    /// collection id.
    fn where_sql(
        &self,
        collection_id: Uuid,
        filter: &[FilterClause],
        binds: &mut Vec<Bind>,
    ) -> StoreResult<String> {
        binds.push(Bind::Uuid(collection_id));
        let mut conjuncts = vec!["d.collection_id = ?".to_string()];
        for clause in filter {
            conjuncts.push(self.clause_sql(clause, binds)?);
        }
        Ok(conjuncts.join(" AND "))
    }

    /// Build the SELECT for a list query.
    pub fn list(&self, collection_id: Uuid, query: &DocumentQuery) -> StoreResult<SqlQuery> {
        let mut binds = Vec::new();
        let mut sql = String::from("SELECT d.* FROM documents d WHERE ");
        sql.push_str(&self.where_sql(collection_id, &query.filter, &mut binds)?);

        if !query.order_by.is_empty() {
            let mut terms = Vec::with_capacity(query.order_by.len());
            for order in &query.order_by {
                let field = self.field(&order.field)?;
                let expr = self.field_expr(field, &mut binds);
                terms.push(format!("{expr} {}", order.direction.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        } else {
            sql.push_str(" ORDER BY d.created_at, d.document_id");
        }

        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                binds.push(Bind::Int(i64::from(limit)));
                binds.push(Bind::Int(i64::from(offset.unwrap_or(0))));
            }
            (None, Some(offset)) => {
                // SQLite requires LIMIT before OFFSET; -1 means unbounded.
                sql.push_str(" LIMIT -1 OFFSET ?");
                binds.push(Bind::Int(i64::from(offset)));
            }
            (None, None) => {}
        }

        Ok(SqlQuery { sql, binds })
    }

    /// Build the SELECT COUNT for a filter.
    pub fn count(&self, collection_id: Uuid, filter: &[FilterClause]) -> StoreResult<SqlQuery> {
        let mut binds = Vec::new();
        let mut sql = String::from("SELECT COUNT(*) FROM documents d WHERE ");
        sql.push_str(&self.where_sql(collection_id, filter, &mut binds)?);
        Ok(SqlQuery { sql, binds })
    }

    /// Build an aggregate SELECT.
    ///
    /// Each result row is rendered by SQLite as a single `json_object(...)`
    /// TEXT column whose keys are bound parameters, so dynamic result shapes
    /// never require dynamic decoding.
    pub fn aggregate(&self, collection_id: Uuid, query: &AggregateQuery) -> StoreResult<SqlQuery> {
        if query.aggregations.is_empty() {
            return Err(StoreError::Validation(vec![FieldIssue::new(
                "aggregations",
                "at least one aggregation is required",
            )]));
        }

        let mut select_binds: Vec<Bind> = Vec::new();
        let mut pairs: Vec<String> = Vec::new();

        for group_field in &query.group_by {
            let field = self.field(group_field)?;
            select_binds.push(Bind::Text(field.name.clone()));
            let expr = self.field_expr(field, &mut select_binds);
            pairs.push(format!("?, {expr}"));
        }

        for agg in &query.aggregations {
            let func = AggregateFn::parse(&agg.func)?;
            select_binds.push(Bind::Text(agg.name.clone()));
            let rendered = match (func, agg.field.as_deref()) {
                (AggregateFn::Count, None) => "COUNT(*)".to_string(),
                (AggregateFn::Count, Some(name)) => {
                    let field = self.field(name)?;
                    let expr = self.field_expr(field, &mut select_binds);
                    format!("COUNT({expr})")
                }
                (AggregateFn::Sum | AggregateFn::Avg, None) => {
                    return Err(StoreError::Validation(vec![FieldIssue::new(
                        agg.name.clone(),
                        format!("aggregation '{}' requires a field", agg.func),
                    )]));
                }
                (AggregateFn::Sum | AggregateFn::Avg, Some(name)) => {
                    let field = self.field(name)?;
                    if !field.field_type.is_numeric() {
                        return Err(StoreError::Validation(vec![FieldIssue::new(
                            field.name.clone(),
                            format!("aggregation '{}' requires a numeric field", agg.func),
                        )]));
                    }
                    let expr = self.field_expr(field, &mut select_binds);
                    let sql_fn = if func == AggregateFn::Sum { "SUM" } else { "AVG" };
                    format!("{sql_fn}({expr})")
                }
                (AggregateFn::Min | AggregateFn::Max, Some(name)) => {
                    let field = self.field(name)?;
                    let expr = self.field_expr(field, &mut select_binds);
                    let sql_fn = if func == AggregateFn::Min { "MIN" } else { "MAX" };
                    format!("{sql_fn}({expr})")
                }
                (AggregateFn::Min | AggregateFn::Max, None) => {
                    return Err(StoreError::Validation(vec![FieldIssue::new(
                        agg.name.clone(),
                        format!("aggregation '{}' requires a field", agg.func),
                    )]));
                }
            };
            pairs.push(format!("?, {rendered}"));
        }

        let mut sql = format!("SELECT json_object({}) AS row", pairs.join(", "));
        let mut binds = select_binds;

        sql.push_str(" FROM documents d WHERE ");
        sql.push_str(&self.where_sql(collection_id, &query.filter, &mut binds)?);

        if !query.group_by.is_empty() {
            let mut terms = Vec::with_capacity(query.group_by.len());
            for group_field in &query.group_by {
                let field = self.field(group_field)?;
                terms.push(self.field_expr(field, &mut binds));
            }
            sql.push_str(" GROUP BY ");
            sql.push_str(&terms.join(", "));
        }

        Ok(SqlQuery { sql, binds })
    }
}
