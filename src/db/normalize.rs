//! Result normalization.
//!
//! Every adapter hands back a [`NativeResult`]: column descriptors plus rows of
//! already-portable values in driver order. [`ResultNormalizer`] turns that into
//! the public [`NormalizedResult`] shape.
//!
//! # Architecture
//!
//! Value conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Driver-specific decoders (`mysql`, `postgres`, `mssql`, `oracle`
//!    submodules) extract each value into its portable JSON form
//!
//! Portable forms: integers and floats become numbers (non-finite floats become
//! strings), DECIMAL/NUMERIC stay exact text, temporal values become ISO-8601
//! strings, binary becomes base64, UUIDs become canonical strings and NULL is
//! always `null`.

use crate::models::{EngineType, NormalizedResult, Row};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::time::Duration;

// =============================================================================
// Native Result
// =============================================================================

/// A column as the driver described it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeColumn {
    pub name: String,
    /// Driver type name (e.g. "VARCHAR", "int8", "NVarchar", "NUMBER(10,2)")
    pub type_name: String,
}

impl NativeColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Output of `EngineConnection::run` before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeResult {
    pub columns: Vec<NativeColumn>,
    /// Positional values, one inner vector per row.
    pub rows: Vec<Vec<JsonValue>>,
    pub rows_affected: Option<u64>,
}

impl NativeResult {
    /// A result set.
    pub fn with_rows(columns: Vec<NativeColumn>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
        }
    }

    /// A statement without a result set that reported an affected-row count.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected: Some(rows_affected),
            ..Self::default()
        }
    }

    /// A statement without a result set and without a count (DDL).
    pub fn empty() -> Self {
        Self::default()
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Converts native driver results into [`NormalizedResult`].
pub struct ResultNormalizer;

impl ResultNormalizer {
    /// Normalize `native`, keeping the driver's column order.
    ///
    /// Every output row has exactly the columns of the result, in the same
    /// order: short rows are padded with `null`, long rows truncated.
    pub fn normalize(native: NativeResult, elapsed: Duration) -> NormalizedResult {
        let columns = unique_column_names(&native.columns);
        let column_types = if native.columns.iter().all(|c| c.type_name.is_empty()) {
            Vec::new()
        } else {
            native
                .columns
                .iter()
                .map(|c| normalize_type_name(&c.type_name))
                .collect()
        };

        let rows = native
            .rows
            .into_iter()
            .map(|values| {
                let mut values = values.into_iter();
                columns
                    .iter()
                    .map(|name| (name.clone(), values.next().unwrap_or(JsonValue::Null)))
                    .collect::<Row>()
            })
            .collect();

        NormalizedResult {
            columns,
            column_types,
            rows,
            rows_affected: native.rows_affected,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Column names made unique so the per-row mapping never drops a value.
///
/// Unnamed columns (e.g. SQL Server's `SELECT 1`) become `column<N>` with N the
/// 1-based position; repeated names get `_2`, `_3`, ... suffixes.
fn unique_column_names(columns: &[NativeColumn]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(columns.len());
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let base = if col.name.is_empty() {
                format!("column{}", idx + 1)
            } else {
                col.name.clone()
            };
            let mut name = base.clone();
            let mut suffix = 2;
            while seen.contains(&name) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            seen.insert(name.clone());
            name
        })
        .collect()
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, engine: EngineType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Names that contain "int" but are not integers
    if lower.contains("interval") || lower.contains("point") {
        return TypeCategory::Unknown;
    }

    if lower.contains("decimal") || lower.contains("numeric") || lower.contains("money") {
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    // MySQL BIT(n) decodes as an unsigned integer; PostgreSQL bit strings stay text
    if lower == "bit" {
        return if engine == EngineType::MySql {
            TypeCategory::Integer
        } else {
            TypeCategory::Unknown
        };
    }

    if lower == "timestamptz" || lower.contains("with time zone") {
        return TypeCategory::TimestampTz;
    }
    if lower.starts_with("timestamp") || lower.starts_with("datetime") {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // Character types
    if lower.contains("char")
        || lower.contains("text")
        || lower.contains("clob")
        || lower == "name"
        || lower == "enum"
        || lower == "set"
    {
        return TypeCategory::Text;
    }

    if lower.contains("int") || lower.contains("serial") || lower == "year" {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    TypeCategory::Unknown
}

/// Normalize a database type name to a more consistent format.
pub fn normalize_type_name(type_name: &str) -> String {
    let lower = type_name.to_lowercase();
    // Oracle reports "NUMBER(10,2)"; SQL Server's TDS names carry an "n" suffix
    // for nullable variants ("intn", "bitn")
    let base = lower.split('(').next().unwrap_or(&lower).trim();

    match base {
        // Integers
        "int4" | "integer" | "int" | "intn" | "int unsigned" | "mediumint" => {
            "integer".to_string()
        }
        "int8" | "bigint" | "bigserial" | "bigint unsigned" => "bigint".to_string(),
        "int2" | "smallint" | "smallint unsigned" => "smallint".to_string(),
        "tinyint" | "tiny" | "int1" | "tinyint unsigned" => "tinyint".to_string(),
        // Text
        "varchar" | "character varying" | "text" | "string" | "nvarchar" | "varchar2"
        | "nvarchar2" | "bigvarchar" | "ntext" | "longtext" | "mediumtext" | "tinytext"
        | "clob" | "nclob" => "text".to_string(),
        "char" | "character" | "bpchar" | "nchar" | "bigchar" => "char".to_string(),
        // Boolean
        "bool" | "boolean" | "bit" | "bitn" => "boolean".to_string(),
        // Float
        "float4" | "real" | "float" | "binary_float" => "real".to_string(),
        "float8" | "double precision" | "double" | "floatn" | "binary_double" => {
            "double".to_string()
        }
        // Decimal
        "decimal" | "numeric" | "number" | "decimaln" | "numericn" | "money" | "moneyn" => {
            "decimal".to_string()
        }
        // Binary
        "bytea" | "blob" | "binary" | "varbinary" | "bigbinary" | "bigvarbin" | "raw"
        | "long raw" | "image" | "longblob" | "mediumblob" | "tinyblob" => "binary".to_string(),
        // Date/Time
        "timestamp" | "datetime" | "datetime2" | "datetimen" | "smalldatetime" => {
            "timestamp".to_string()
        }
        "timestamptz" | "datetimeoffsetn" | "datetimeoffset" | "timestamp with time zone" => {
            "timestamptz".to_string()
        }
        "date" | "daten" => "date".to_string(),
        "time" | "timen" | "timetz" => "time".to_string(),
        // JSON
        "json" | "jsonb" => "json".to_string(),
        // UUID
        "uuid" | "guid" | "uniqueidentifier" => "uuid".to_string(),
        // Default
        _ => base.to_string(),
    }
}

// =============================================================================
// Portable Value Helpers
// =============================================================================

/// Encode binary data as a standard base64 string.
pub fn binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Finite floats become numbers; NaN and infinities become their text form.
/// Bytes that are valid UTF-8 as a string, anything else as base64.
pub fn utf8_or_binary_value(bytes: Vec<u8>) -> JsonValue {
    match String::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text),
        Err(e) => binary_value(e.as_bytes()),
    }
}

pub fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Exact numeric text: integral values that fit in i64 become numbers, the rest
/// stay strings so no precision is lost.
pub fn number_text_value(text: &str) -> JsonValue {
    match text.parse::<i64>() {
        Ok(v) => JsonValue::Number(v.into()),
        Err(_) => JsonValue::String(text.to_string()),
    }
}

pub fn timestamp_value(ts: NaiveDateTime) -> JsonValue {
    JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

pub fn timestamptz_value<Tz: TimeZone>(ts: DateTime<Tz>) -> JsonValue
where
    Tz::Offset: std::fmt::Display,
{
    JsonValue::String(ts.to_rfc3339())
}

pub fn date_value(d: NaiveDate) -> JsonValue {
    JsonValue::String(d.format("%Y-%m-%d").to_string())
}

pub fn time_value(t: NaiveTime) -> JsonValue {
    JsonValue::String(t.format("%H:%M:%S%.f").to_string())
}

// =============================================================================
// sqlx Decoders (MySQL, PostgreSQL)
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl sqlx::Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        use sqlx::TypeInfo;
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: sqlx::mysql::MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl sqlx::Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        use sqlx::TypeInfo;
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal") || name.contains("money")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Column descriptors of a sqlx row or statement description.
pub fn sqlx_columns<C: sqlx::Column>(columns: &[C]) -> Vec<NativeColumn> {
    use sqlx::TypeInfo;
    columns
        .iter()
        .map(|c| NativeColumn::new(c.name(), c.type_info().name()))
        .collect()
}

/// Decoders shared verbatim by the sqlx-backed engines; only the row type differs.
macro_rules! sqlx_common_decoders {
    ($row:ty) => {
        fn decode_decimal(row: &$row, idx: usize) -> JsonValue {
            match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => JsonValue::String(v.0),
                Ok(None) => JsonValue::Null,
                Err(e) => {
                    tracing::debug!(column = idx, error = %e, "Failed to decode DECIMAL");
                    decode_fallback(row, idx)
                }
            }
        }

        fn decode_boolean(row: &$row, idx: usize) -> JsonValue {
            row.try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null)
        }

        fn decode_float(row: &$row, idx: usize) -> JsonValue {
            if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                return v.map(float_value).unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
                return v.map(|v| float_value(v as f64)).unwrap_or(JsonValue::Null);
            }
            decode_fallback(row, idx)
        }

        fn decode_timestamp(row: &$row, idx: usize) -> JsonValue {
            match row.try_get::<Option<NaiveDateTime>, _>(idx) {
                Ok(v) => v.map(timestamp_value).unwrap_or(JsonValue::Null),
                Err(_) => decode_timestamptz(row, idx),
            }
        }

        fn decode_timestamptz(row: &$row, idx: usize) -> JsonValue {
            match row.try_get::<Option<DateTime<chrono::Utc>>, _>(idx) {
                Ok(v) => v.map(timestamptz_value).unwrap_or(JsonValue::Null),
                Err(_) => decode_fallback(row, idx),
            }
        }

        fn decode_date(row: &$row, idx: usize) -> JsonValue {
            match row.try_get::<Option<NaiveDate>, _>(idx) {
                Ok(v) => v.map(date_value).unwrap_or(JsonValue::Null),
                Err(_) => decode_fallback(row, idx),
            }
        }

        fn decode_time(row: &$row, idx: usize) -> JsonValue {
            match row.try_get::<Option<NaiveTime>, _>(idx) {
                Ok(v) => v.map(time_value).unwrap_or(JsonValue::Null),
                Err(_) => decode_fallback(row, idx),
            }
        }

        fn decode_text(row: &$row, idx: usize) -> JsonValue {
            match row.try_get::<Option<String>, _>(idx) {
                Ok(v) => v.map(JsonValue::String).unwrap_or(JsonValue::Null),
                Err(_) => decode_fallback(row, idx),
            }
        }

        /// Last resort for types without a dedicated decoder: the raw value as text.
        fn decode_fallback(row: &$row, idx: usize) -> JsonValue {
            use sqlx::ValueRef;
            match row.try_get_raw(idx) {
                Ok(raw) if raw.is_null() => return JsonValue::Null,
                Ok(_) => {}
                Err(_) => return JsonValue::Null,
            }
            match row.try_get_unchecked::<String, _>(idx) {
                Ok(s) => JsonValue::String(s),
                Err(e) => {
                    tracing::debug!(column = idx, error = %e, "Undecodable value, returning null");
                    JsonValue::Null
                }
            }
        }
    };
}

pub mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{Column, Row, TypeInfo};

    /// Decode every column of a MySQL row, in column order.
    pub fn decode_row(row: &MySqlRow) -> Vec<JsonValue> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), EngineType::MySql);
                decode_column(row, idx, category)
            })
            .collect()
    }

    fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_bytes(row, idx),
            TypeCategory::Timestamp | TypeCategory::TimestampTz => decode_timestamp(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            TypeCategory::Time => decode_time(row, idx),
            // MySQL JSON is returned as its text
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        // Unsigned types
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        decode_fallback(row, idx)
    }

    // VARCHAR/TEXT under a `_bin` collation carries the BINARY flag and is
    // reported as VARBINARY/BLOB, so the bytes decide between text and base64
    fn decode_bytes(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<Vec<u8>>, _>(idx) {
            Ok(v) => v.map(utf8_or_binary_value).unwrap_or(JsonValue::Null),
            Err(_) => decode_fallback(row, idx),
        }
    }

    sqlx_common_decoders!(MySqlRow);
}

pub mod postgres {
    use super::*;
    use sqlx::postgres::PgRow;
    use sqlx::{Column, Row, TypeInfo};

    /// Decode every column of a PostgreSQL row, in column order.
    pub fn decode_row(row: &PgRow) -> Vec<JsonValue> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), EngineType::PostgreSql);
                decode_column(row, idx, category)
            })
            .collect()
    }

    fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_bytea(row, idx),
            TypeCategory::Json => decode_json_text(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::TimestampTz => decode_timestamptz(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            TypeCategory::Time => decode_time(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        decode_fallback(row, idx)
    }

    fn decode_bytea(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json_text(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<serde_json::Value>, _>(idx) {
            Ok(v) => v
                .map(|json| JsonValue::String(json.to_string()))
                .unwrap_or(JsonValue::Null),
            Err(_) => decode_fallback(row, idx),
        }
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<sqlx::types::Uuid>, _>(idx) {
            Ok(v) => v
                .map(|u| JsonValue::String(u.hyphenated().to_string()))
                .unwrap_or(JsonValue::Null),
            Err(_) => decode_fallback(row, idx),
        }
    }

    sqlx_common_decoders!(PgRow);
}

// =============================================================================
// SQL Server Decoder (tiberius)
// =============================================================================

pub mod mssql {
    use super::*;
    use tiberius::{ColumnData, FromSql};

    pub fn columns(columns: &[tiberius::Column]) -> Vec<NativeColumn> {
        columns
            .iter()
            .map(|c| NativeColumn::new(c.name(), format!("{:?}", c.column_type())))
            .collect()
    }

    /// Decode every cell of a SQL Server row, in column order.
    pub fn decode_row(row: &tiberius::Row) -> Vec<JsonValue> {
        row.cells().map(|(_, data)| decode_cell(data)).collect()
    }

    #[allow(unreachable_patterns)]
    pub fn decode_cell(data: &ColumnData<'static>) -> JsonValue {
        let value = match data {
            ColumnData::Bit(v) => v.map(JsonValue::Bool),
            ColumnData::U8(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::I16(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::I32(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::I64(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::F32(v) => v.map(|v| float_value(v as f64)),
            ColumnData::F64(v) => v.map(float_value),
            ColumnData::Numeric(v) => v.map(|n| JsonValue::String(numeric_text(&n))),
            ColumnData::String(v) => v.as_ref().map(|s| JsonValue::String(s.to_string())),
            ColumnData::Guid(v) => v.map(|g| JsonValue::String(g.hyphenated().to_string())),
            ColumnData::Binary(v) => v.as_ref().map(|b| binary_value(b)),
            ColumnData::Xml(v) => v.as_ref().map(|x| JsonValue::String(x.to_string())),
            ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
                decoded(NaiveDateTime::from_sql(data), timestamp_value)
            }
            ColumnData::DateTimeOffset(_) => {
                decoded(DateTime::<chrono::Utc>::from_sql(data), timestamptz_value)
            }
            ColumnData::Date(_) => decoded(NaiveDate::from_sql(data), date_value),
            ColumnData::Time(_) => decoded(NaiveTime::from_sql(data), time_value),
            _ => None,
        };
        value.unwrap_or(JsonValue::Null)
    }

    /// Exact decimal text of a NUMERIC/DECIMAL/MONEY value.
    pub fn numeric_text(n: &tiberius::numeric::Numeric) -> String {
        let scale = n.scale() as usize;
        let value = n.value();
        if scale == 0 {
            return value.to_string();
        }
        let digits = format!("{:0>width$}", value.unsigned_abs(), width = scale + 1);
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        let sign = if value < 0 { "-" } else { "" };
        format!("{}{}.{}", sign, int_part, frac_part)
    }

    fn decoded<T>(
        result: tiberius::Result<Option<T>>,
        to_json: impl FnOnce(T) -> JsonValue,
    ) -> Option<JsonValue> {
        match result {
            Ok(v) => v.map(to_json),
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable SQL Server value, returning null");
                None
            }
        }
    }
}

// =============================================================================
// Oracle Decoder
// =============================================================================

pub mod oracle {
    use super::*;
    use ::oracle::sql_type::OracleType;

    pub fn columns(info: &[::oracle::ColumnInfo]) -> Vec<NativeColumn> {
        info.iter()
            .map(|c| NativeColumn::new(c.name(), c.oracle_type().to_string()))
            .collect()
    }

    /// Decode every column of an Oracle row, in column order.
    pub fn decode_row(row: &::oracle::Row, types: &[OracleType]) -> Vec<JsonValue> {
        types
            .iter()
            .enumerate()
            .map(|(idx, ty)| decode_column(row, idx, ty))
            .collect()
    }

    fn decode_column(row: &::oracle::Row, idx: usize, ty: &OracleType) -> JsonValue {
        let value = match ty {
            OracleType::Number(_, _) | OracleType::Float(_) => {
                get::<String>(row, idx).map(|s| s.map(|s| number_text_value(&s)))
            }
            OracleType::BinaryFloat | OracleType::BinaryDouble => {
                get::<f64>(row, idx).map(|v| v.map(float_value))
            }
            OracleType::Int64 => get::<i64>(row, idx).map(|v| v.map(|v| JsonValue::Number(v.into()))),
            OracleType::UInt64 => {
                get::<u64>(row, idx).map(|v| v.map(|v| JsonValue::Number(v.into())))
            }
            OracleType::Boolean => get::<bool>(row, idx).map(|v| v.map(JsonValue::Bool)),
            OracleType::Date | OracleType::Timestamp(_) => {
                get::<NaiveDateTime>(row, idx).map(|v| v.map(timestamp_value))
            }
            OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
                get::<DateTime<chrono::FixedOffset>>(row, idx).map(|v| v.map(timestamptz_value))
            }
            OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
                get::<Vec<u8>>(row, idx).map(|v| v.map(|b| binary_value(&b)))
            }
            _ => get::<String>(row, idx).map(|v| v.map(JsonValue::String)),
        };
        match value {
            Ok(v) => v.unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::debug!(column = idx, oracle_type = %ty, error = %e, "Undecodable Oracle value, returning null");
                JsonValue::Null
            }
        }
    }

    fn get<T: ::oracle::sql_type::FromSql>(
        row: &::oracle::Row,
        idx: usize,
    ) -> ::oracle::Result<Option<T>> {
        row.get::<usize, Option<T>>(idx)
    }
}
