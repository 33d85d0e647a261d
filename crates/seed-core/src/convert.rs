//! # Column Value Conversion
//!
//! Turns source attributes (JSON values) into typed cells for one table.
//!
//! ## Conversion Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       convert(column, value)                            │
//! │                                                                         │
//! │  value is null?                                                        │
//! │    ├── column has a DB default      → default (CURRENT_TIMESTAMP = now)│
//! │    ├── nvl_mode and type in table   → NVL value (0, 0.0, "", false)    │
//! │    └── otherwise                    → NULL                             │
//! │                                                                         │
//! │  value present → coerce to column type                                 │
//! │    integer  : 12, 12.0, "12", true                                     │
//! │    real     : 1.5, "1.5"                                               │
//! │    boolean  : true, 1, "yes", "t", "0"                                 │
//! │    datetime : RFC 3339 / "YYYY-MM-DD HH:MM:SS" / unix seconds          │
//! │               + datetime_offset                                         │
//! │    text     : strings as-is, scalars stringified, objects as JSON      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    parse_datetime, CellValue, ColumnDefault, ColumnInfo, ColumnType, Row, SourceRecord,
    TableSchema,
};
use crate::validation::FieldError;

// =============================================================================
// NVL Table
// =============================================================================

/// Replacement values for nulls when nvl-mode is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvlTable {
    #[serde(default)]
    pub integer: i64,

    #[serde(default)]
    pub real: f64,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub boolean: bool,
}

impl Default for NvlTable {
    fn default() -> Self {
        NvlTable {
            integer: 0,
            real: 0.0,
            text: String::new(),
            boolean: false,
        }
    }
}

impl NvlTable {
    /// Replacement for a null of the given type. Datetimes have none.
    pub fn value_for(&self, column_type: ColumnType) -> Option<CellValue> {
        match column_type {
            ColumnType::Integer => Some(CellValue::Integer(self.integer)),
            ColumnType::Real => Some(CellValue::Real(self.real)),
            ColumnType::Text => Some(CellValue::Text(self.text.clone())),
            ColumnType::Boolean => Some(CellValue::Boolean(self.boolean)),
            ColumnType::DateTime => None,
        }
    }
}

// =============================================================================
// Conversion Options
// =============================================================================

/// Per-run conversion settings.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Substitute NVL values for nulls in columns without a default.
    pub nvl_mode: bool,

    /// Added to every parsed datetime value.
    pub datetime_offset: Duration,

    /// Replacement values used in nvl-mode.
    pub nvl: NvlTable,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            nvl_mode: false,
            datetime_offset: Duration::zero(),
            nvl: NvlTable::default(),
        }
    }
}

// =============================================================================
// Value Converter
// =============================================================================

/// Converts records into rows for one table schema.
#[derive(Debug, Clone)]
pub struct ValueConverter<'a> {
    schema: &'a TableSchema,
    options: &'a ConversionOptions,
    now: DateTime<Utc>,
}

impl<'a> ValueConverter<'a> {
    /// Creates a converter.
    ///
    /// `now` is the value used for `CURRENT_TIMESTAMP` defaults; passing it in
    /// keeps conversion deterministic for a whole run.
    pub fn new(schema: &'a TableSchema, options: &'a ConversionOptions, now: DateTime<Utc>) -> Self {
        ValueConverter {
            schema,
            options,
            now: truncate_to_seconds(now),
        }
    }

    /// Schema the converter was built for.
    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    /// Converts every attribute of a record.
    ///
    /// ## Returns
    /// * `Ok(Row)` - One cell per attribute
    /// * `Err(errors)` - Every conversion problem of the record
    pub fn build_row(&self, record: &SourceRecord) -> Result<Row, Vec<FieldError>> {
        self.collect_row(record, true)
    }

    /// Converts a record that will update an existing row.
    ///
    /// Same as [`build_row`](Self::build_row) except that a null for a
    /// `CURRENT_TIMESTAMP` column is left out of the row, so the stored
    /// timestamp is neither compared nor overwritten.
    pub fn build_update_row(&self, record: &SourceRecord) -> Result<Row, Vec<FieldError>> {
        self.collect_row(record, false)
    }

    fn collect_row(&self, record: &SourceRecord, stamp_now: bool) -> Result<Row, Vec<FieldError>> {
        let mut row = Row::new();
        let mut errors = Vec::new();

        for (name, value) in record.attributes() {
            let Some(column) = self.schema.column(name) else {
                errors.push(FieldError::UnknownColumn {
                    column: name.clone(),
                });
                continue;
            };

            if !stamp_now && value.is_null() && column.default == Some(ColumnDefault::Now) {
                continue;
            }

            match self.convert(column, value) {
                Ok(cell) => {
                    row.insert(name.clone(), cell);
                }
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(row)
        } else {
            Err(errors)
        }
    }

    /// Converts one value for one column.
    pub fn convert(&self, column: &ColumnInfo, value: &Value) -> Result<CellValue, FieldError> {
        if value.is_null() {
            return Ok(self.null_replacement(column));
        }

        let invalid = |reason: String| FieldError::InvalidValue {
            column: column.name.clone(),
            expected: column.column_type,
            reason,
        };

        match column.column_type {
            ColumnType::Integer => coerce_integer(value).map(CellValue::Integer).map_err(invalid),
            ColumnType::Real => coerce_real(value).map(CellValue::Real).map_err(invalid),
            ColumnType::Boolean => coerce_boolean(value).map(CellValue::Boolean).map_err(invalid),
            ColumnType::Text => Ok(CellValue::Text(coerce_text(value))),
            ColumnType::DateTime => {
                let parsed = coerce_datetime(value).map_err(invalid)?;
                parsed
                    .checked_add_signed(self.options.datetime_offset)
                    .map(|dt| CellValue::DateTime(truncate_to_seconds(dt)))
                    .ok_or_else(|| invalid("datetime offset overflows".to_string()))
            }
        }
    }

    fn null_replacement(&self, column: &ColumnInfo) -> CellValue {
        match &column.default {
            Some(ColumnDefault::Value(value)) => return value.clone(),
            Some(ColumnDefault::Now) => {
                return match column.column_type {
                    ColumnType::DateTime => CellValue::DateTime(self.now),
                    _ => CellValue::Text(self.now.format(crate::types::DATETIME_FORMAT).to_string()),
                }
            }
            None => {}
        }

        if self.options.nvl_mode {
            if let Some(value) = self.options.nvl.value_for(column.column_type) {
                return value;
            }
        }

        CellValue::Null
    }
}

// =============================================================================
// Coercion Helpers
// =============================================================================

fn coerce_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && fits_i64(*f)).map(|f| f as i64))
            .ok_or_else(|| format!("{} is not an integer in the 64-bit range", n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer", s)),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("{} is not an integer", other)),
    }
}

/// Whether `f` lies in [-2^63, 2^63); `as` casts saturate outside it.
fn fits_i64(f: f64) -> bool {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (-LIMIT..LIMIT).contains(&f)
}

fn coerce_real(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{} is not a number", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s)),
        other => Err(format!("{} is not a number", other)),
    }
}

fn coerce_boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{} is not a boolean", n)),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Ok(true),
            "false" | "f" | "0" | "no" | "n" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("{} is not a boolean", other)),
    }
}

fn coerce_datetime(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => parse_datetime(s).ok_or_else(|| format!("'{}' is not a datetime", s)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| format!("{} is not a unix timestamp", n)),
        other => Err(format!("{} is not a datetime", other)),
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, ty: ColumnType, nullable: bool, default: Option<ColumnDefault>) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            declared_type: ty.to_string(),
            column_type: ty,
            nullable,
            default,
            primary_key: name == "id",
        }
    }

    fn schema() -> TableSchema {
        TableSchema {
            table: "products".into(),
            columns: vec![
                column("id", ColumnType::Integer, false, None),
                column("name", ColumnType::Text, false, None),
                column("price", ColumnType::Integer, true, None),
                column("weight", ColumnType::Real, true, None),
                column("active", ColumnType::Boolean, false, Some(ColumnDefault::Value(CellValue::Boolean(true)))),
                column("released_at", ColumnType::DateTime, true, None),
                column("created_at", ColumnType::DateTime, true, Some(ColumnDefault::Now)),
            ],
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_build_row_coerces_types() {
        let schema = schema();
        let options = ConversionOptions::default();
        let converter = ValueConverter::new(&schema, &options, fixed_now());

        let record = SourceRecord::from_value(
            0,
            json!({"id": 1, "name": 42, "price": "120", "weight": "1.5", "active": "no",
                   "released_at": "2024-02-03 04:05:06"}),
        )
        .unwrap();

        let row = converter.build_row(&record).unwrap();
        assert_eq!(row["name"], CellValue::Text("42".into()));
        assert_eq!(row["price"], CellValue::Integer(120));
        assert_eq!(row["weight"], CellValue::Real(1.5));
        assert_eq!(row["active"], CellValue::Boolean(false));
        assert_eq!(
            row["released_at"],
            CellValue::DateTime(Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap())
        );
    }

    #[test]
    fn test_datetime_offset_is_applied() {
        let schema = schema();
        let options = ConversionOptions {
            datetime_offset: Duration::hours(-9),
            ..ConversionOptions::default()
        };
        let converter = ValueConverter::new(&schema, &options, fixed_now());
        let col = schema.column("released_at").unwrap();

        let cell = converter.convert(col, &json!("2024-02-03 09:00:00")).unwrap();
        assert_eq!(
            cell,
            CellValue::DateTime(Utc.with_ymd_and_hms(2024, 2, 3, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_null_uses_default_then_nvl() {
        let schema = schema();
        let plain = ConversionOptions::default();
        let nvl = ConversionOptions {
            nvl_mode: true,
            ..ConversionOptions::default()
        };

        let converter = ValueConverter::new(&schema, &plain, fixed_now());
        let active = schema.column("active").unwrap();
        let created = schema.column("created_at").unwrap();
        let price = schema.column("price").unwrap();
        let released = schema.column("released_at").unwrap();

        assert_eq!(converter.convert(active, &Value::Null).unwrap(), CellValue::Boolean(true));
        assert_eq!(converter.convert(created, &Value::Null).unwrap(), CellValue::DateTime(fixed_now()));
        assert_eq!(converter.convert(price, &Value::Null).unwrap(), CellValue::Null);

        let converter = ValueConverter::new(&schema, &nvl, fixed_now());
        assert_eq!(converter.convert(price, &Value::Null).unwrap(), CellValue::Integer(0));
        assert_eq!(converter.convert(released, &Value::Null).unwrap(), CellValue::Null);
    }

    #[test]
    fn test_out_of_range_float_is_not_an_integer() {
        let schema = schema();
        let options = ConversionOptions::default();
        let converter = ValueConverter::new(&schema, &options, fixed_now());
        let price = schema.column("price").unwrap();

        for value in [json!(1e20), json!(-1e30), json!(9.3e18)] {
            let err = converter.convert(price, &value).unwrap_err();
            assert!(matches!(err, FieldError::InvalidValue { expected: ColumnType::Integer, .. }));
        }

        assert_eq!(converter.convert(price, &json!(4.0)).unwrap(), CellValue::Integer(4));
        assert_eq!(
            converter.convert(price, &json!(-9.223372036854775808e18)).unwrap(),
            CellValue::Integer(i64::MIN)
        );
    }

    #[test]
    fn test_update_row_leaves_out_null_timestamps() {
        let schema = schema();
        let options = ConversionOptions::default();
        let converter = ValueConverter::new(&schema, &options, fixed_now());

        let record = SourceRecord::from_value(
            0,
            json!({"id": 1, "name": "pen", "active": null, "created_at": null}),
        )
        .unwrap();

        let insert = converter.build_row(&record).unwrap();
        assert_eq!(insert["created_at"], CellValue::DateTime(fixed_now()));

        let update = converter.build_update_row(&record).unwrap();
        assert!(!update.contains_key("created_at"));
        // Literal defaults still apply
        assert_eq!(update["active"], CellValue::Boolean(true));

        let stamped = SourceRecord::from_value(
            0,
            json!({"id": 1, "created_at": "2023-05-06 07:08:09"}),
        )
        .unwrap();
        assert_eq!(
            converter.build_update_row(&stamped).unwrap()["created_at"],
            CellValue::DateTime(Utc.with_ymd_and_hms(2023, 5, 6, 7, 8, 9).unwrap())
        );
    }

    #[test]
    fn test_build_row_collects_all_errors() {
        let schema = schema();
        let options = ConversionOptions::default();
        let converter = ValueConverter::new(&schema, &options, fixed_now());

        let record = SourceRecord::from_value(
            0,
            json!({"id": 1, "price": "cheap", "colour": "red", "released_at": "soon"}),
        )
        .unwrap();

        let errors = converter.build_row(&record).unwrap_err();
        let columns: Vec<&str> = errors.iter().map(FieldError::column).collect();
        assert_eq!(columns, vec!["colour", "price", "released_at"]);
        assert!(matches!(errors[0], FieldError::UnknownColumn { .. }));
    }
}
