use crate::core::planner::Plan;
use crate::utils::error::{EtlError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One input event: a nested JSON object, owned by the caller and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new(data: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { data }
    }

    /// Wraps a JSON value; anything other than an object is rejected.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(data) => Some(Self { data }),
            _ => None,
        }
    }
}

/// Dotted key sequence locating a value inside a record, e.g. `customer.details.name`.
///
/// Ordering is segment-wise, so `a.b` sorts before `a_b` regardless of the separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root(key: &str) -> Self {
        Self(vec![key.to_string()])
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(EtlError::InvalidConfigValueError {
                field: "field_path".to_string(),
                value: path.to_string(),
                reason: "Field paths are non-empty keys separated by '.'".to_string(),
            });
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Segments after `prefix`, if this path lies under it.
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<&[String]> {
        if self.starts_with(prefix) {
            Some(&self.0[prefix.0.len()..])
        } else {
            None
        }
    }

    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join("."))
    }
}

impl TryFrom<String> for FieldPath {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self> {
        FieldPath::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedType {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    Array,
    Mixed,
}

impl ObservedType {
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ObservedType::Null,
            serde_json::Value::Bool(_) => ObservedType::Boolean,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => ObservedType::Integer,
            serde_json::Value::Number(_) => ObservedType::Float,
            serde_json::Value::String(_) => ObservedType::String,
            serde_json::Value::Array(_) => ObservedType::Array,
            // objects are descended by the profiler, never typed as leaves
            serde_json::Value::Object(_) => ObservedType::Mixed,
        }
    }

    /// Most specific common type of two observations.
    pub fn merge(self, other: ObservedType) -> ObservedType {
        use ObservedType::{Float, Integer, Mixed, Null};
        match (self, other) {
            (a, b) if a == b => a,
            (Null, b) => b,
            (a, Null) => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Mixed,
        }
    }
}

impl fmt::Display for ObservedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObservedType::Null => "null",
            ObservedType::Boolean => "boolean",
            ObservedType::Integer => "integer",
            ObservedType::Float => "float",
            ObservedType::String => "string",
            ObservedType::Array => "array",
            ObservedType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// Profile of one leaf path across the sample set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldProfile {
    pub path: FieldPath,
    pub observed: ObservedType,
    pub seen_types: BTreeSet<ObservedType>,
    pub is_array: bool,
    pub is_optional: bool,
    pub is_nullable: bool,
    pub occurrences: usize,
}

impl FieldProfile {
    pub fn depth(&self) -> usize {
        self.path.depth()
    }

    pub fn seen_types_label(&self) -> String {
        self.seen_types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Structural summary of the sample set: one entry per distinct leaf path, sorted by path.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StructuralSummary {
    pub sample_count: usize,
    pub fields: BTreeMap<FieldPath, FieldProfile>,
    /// Paths of nested objects that own at least one leaf.
    pub objects: BTreeSet<FieldPath>,
}

impl StructuralSummary {
    pub fn get(&self, path: &FieldPath) -> Option<&FieldProfile> {
        self.fields.get(path)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &FieldProfile> {
        self.fields.values()
    }

    pub fn array_fields(&self) -> impl Iterator<Item = &FieldProfile> {
        self.fields.values().filter(|f| f.is_array)
    }

    pub fn max_depth(&self) -> usize {
        self.fields.keys().map(FieldPath::depth).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Scalar cell of the tabular result. Arrays survive only when no drop rule removes them.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Array(Vec<serde_json::Value>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "boolean",
            CellValue::Integer(_) => "integer",
            CellValue::Float(_) => "float",
            CellValue::Text(_) => "string",
            CellValue::Array(_) => "array",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Integer(i) => serde_json::Value::from(*i),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Array(items) => serde_json::Value::Array(items.clone()),
        }
    }

    /// Text form used for CSV output and console rendering.
    pub fn render(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Array(items) => serde_json::Value::Array(items.clone()).to_string(),
        }
    }
}

impl TryFrom<serde_json::Value> for CellValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => CellValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => CellValue::Text(s),
            serde_json::Value::Array(items) => CellValue::Array(items),
            serde_json::Value::Object(_) => {
                return Err("nested objects are not scalar cell values".to_string())
            }
        })
    }
}

impl From<CellValue> for serde_json::Value {
    fn from(cell: CellValue) -> Self {
        cell.to_json()
    }
}

impl Serialize for CellValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        CellValue::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Text(s) => write!(f, "{:?}", s),
            other => f.write_str(&other.render()),
        }
    }
}

/// One output row, keyed by final column name in schema order.
pub type Row = IndexMap<String, CellValue>;

/// Rows plus the ordered, unique column list every row conforms to.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl TabularResult {
    /// Builds the schema as the first-seen union of row columns followed by
    /// `required` columns not seen in any row, then pads every row to it.
    pub fn from_rows(rows: Vec<Row>, required: &[String]) -> Self {
        let mut columns: IndexMap<String, ()> = IndexMap::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains_key(key) {
                    columns.insert(key.clone(), ());
                }
            }
        }
        for column in required {
            if !columns.contains_key(column) {
                columns.insert(column.clone(), ());
            }
        }
        let columns: Vec<String> = columns.into_keys().collect();

        let rows = rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.shift_remove(c).unwrap_or(CellValue::Null)))
                    .collect::<Row>()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a CellValue> + 'a {
        self.rows.iter().filter_map(move |row| row.get(column))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// How many rows a rule acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleApplication {
    pub rule_index: usize,
    pub rule: String,
    pub applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueResolution {
    Defaulted,
    RowDropped,
    Aborted,
}

/// A recovered (or, for fail-fast, fatal) rule application failure on one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub rule_index: usize,
    pub rule: String,
    pub column: String,
    pub message: String,
    pub resolution: IssueResolution,
}

impl RowIssue {
    /// The per-row rule failure this issue recovered from.
    pub fn to_error(&self) -> EtlError {
        EtlError::RuleApplication {
            rule: format!("#{} {}", self.rule_index, self.rule),
            column: self.column.clone(),
            row: self.row,
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    pub input_rows: usize,
    pub row_count: usize,
    pub dropped_rows: usize,
    pub rule_applications: Vec<RuleApplication>,
    pub issues: Vec<RowIssue>,
    pub error: Option<RowIssue>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn applied(&self, rule_index: usize) -> Option<usize> {
        self.rule_applications
            .iter()
            .find(|a| a.rule_index == rule_index)
            .map(|a| a.applied)
    }

    pub fn failure_message(&self) -> String {
        match &self.error {
            Some(issue) => format!(
                "rule #{} {} failed on row {} (column '{}'): {}",
                issue.rule_index, issue.rule, issue.row, issue.column, issue.message
            ),
            None => "no failure recorded".to_string(),
        }
    }
}

/// Reference to a table written by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableHandle {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Output of the transform phase, handed to the loader.
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub summary: StructuralSummary,
    pub plan: Plan,
    pub table: TabularResult,
    pub report: ExecutionReport,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub handle: TableHandle,
    pub verification: QueryResult,
}
