//! Type convertor (Component D): coerces arbitrary raw API values (JSON)
//! into the storage-column type system (`row::Value`). See spec §4.4.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use diagnostics::{catch_panic, Diagnostics};
use ipnetwork::IpNetwork;
use macaddr::MacAddr6;
use row::Value;
use schema::{Column, ColumnType, Table};
use serde_json::Value as Raw;

/// Strings from an API that should be treated as null for non-string
/// columns (spec §4.4, "invalid-string blacklist"). Never applied to
/// string columns, to avoid silently erasing legitimate string data.
pub fn default_blacklist() -> HashSet<String> {
    ["", "N/A", "not_supported"].iter().map(|s| s.to_string()).collect()
}

/// Fixed ordered list of timestamp patterns tried in order (spec §4.4).
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
];

pub trait Convertor: Send + Sync {
    fn convert(&self, table: &Table, column: &Column, raw: &Raw) -> (Value, Diagnostics);
}

/// The default convertor, parameterized by the invalid-string blacklist
/// and the timezone missing-offset timestamps are re-stamped into.
pub struct DefaultConvertor {
    blacklist: HashSet<String>,
    default_timezone: chrono::FixedOffset,
}

impl Default for DefaultConvertor {
    fn default() -> Self {
        DefaultConvertor {
            blacklist: default_blacklist(),
            default_timezone: chrono::FixedOffset::east_opt(0).unwrap(),
        }
    }
}

impl DefaultConvertor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blacklist(blacklist: impl IntoIterator<Item = String>) -> Self {
        DefaultConvertor {
            blacklist: blacklist.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_default_timezone(mut self, tz: chrono::FixedOffset) -> Self {
        self.default_timezone = tz;
        self
    }
}

impl Convertor for DefaultConvertor {
    fn convert(&self, _table: &Table, column: &Column, raw: &Raw) -> (Value, Diagnostics) {
        let mut diags = Diagnostics::new();

        if raw.is_null() {
            return (Value::Null, diags);
        }

        if column.column_type != ColumnType::String {
            if let Some(s) = raw.as_str() {
                if self.blacklist.contains(s) {
                    return (Value::Null, diags);
                }
            }
        }

        match catch_panic("convert", || coerce(column.column_type, raw, self.default_timezone)) {
            Ok(Ok(value)) => (value, diags),
            Ok(Err(message)) => {
                diags.error(format!(
                    "column {:?}: failed to convert value {}: {}",
                    column.name, raw, message
                ));
                (Value::Null, diags)
            }
            Err(panic_diags) => {
                diags.merge(panic_diags);
                (Value::Null, diags)
            }
        }
    }
}

fn coerce(column_type: ColumnType, raw: &Raw, default_tz: chrono::FixedOffset) -> Result<Value, String> {
    match column_type {
        ColumnType::Unassigned => Err("column has no assigned type".to_string()),
        ColumnType::Bool => coerce_bool(raw).map(Value::Bool),
        ColumnType::SmallInt => coerce_i64(raw).map(|v| Value::SmallInt(v as i16)),
        ColumnType::Int => coerce_i64(raw).map(|v| Value::Int(v as i32)),
        ColumnType::BigInt => coerce_i64(raw).map(Value::BigInt),
        ColumnType::Float => coerce_f64(raw).map(Value::Float),
        ColumnType::String => Ok(Value::String(coerce_string(raw))),
        ColumnType::IntArray => coerce_array(raw, |v| coerce_i64(v).map(|i| i as i32)).map(Value::IntArray),
        ColumnType::StringArray => coerce_array(raw, |v| Ok(coerce_string(v))).map(Value::StringArray),
        ColumnType::ByteArray => coerce_byte_array(raw).map(Value::Bytes),
        ColumnType::Timestamp => coerce_timestamp(raw, default_tz).map(|opt| opt.map(Value::Timestamp).unwrap_or(Value::Null)),
        ColumnType::Json => coerce_json(raw),
        ColumnType::Ip => coerce_ip(raw).map(Value::Ip),
        ColumnType::IpArray => coerce_array(raw, coerce_ip).map(Value::IpArray),
        ColumnType::Cidr => coerce_cidr(raw).map(Value::Cidr),
        ColumnType::CidrArray => coerce_array(raw, coerce_cidr).map(Value::CidrArray),
        ColumnType::Mac => coerce_mac(raw).map(Value::Mac),
        ColumnType::MacArray => coerce_array(raw, coerce_mac).map(Value::MacArray),
    }
}

fn coerce_bool(raw: &Raw) -> Result<bool, String> {
    match raw {
        Raw::Bool(b) => Ok(*b),
        Raw::String(s) => s.parse::<bool>().map_err(|e| e.to_string()),
        Raw::Number(n) => Ok(n.as_i64().map(|i| i != 0).unwrap_or(false)),
        other => Err(format!("cannot convert {other} to bool")),
    }
}

fn coerce_i64(raw: &Raw) -> Result<i64, String> {
    match raw {
        Raw::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("number {n} out of range for integer")),
        Raw::String(s) => s.trim().parse::<i64>().map_err(|e| e.to_string()),
        Raw::Bool(b) => Ok(if *b { 1 } else { 0 }),
        other => Err(format!("cannot convert {other} to integer")),
    }
}

fn coerce_f64(raw: &Raw) -> Result<f64, String> {
    match raw {
        Raw::Number(n) => n.as_f64().ok_or_else(|| format!("number {n} is not representable as float")),
        Raw::String(s) => s.trim().parse::<f64>().map_err(|e| e.to_string()),
        other => Err(format!("cannot convert {other} to float")),
    }
}

fn coerce_string(raw: &Raw) -> String {
    match raw {
        Raw::String(s) => s.clone(),
        Raw::Number(n) => n.to_string(),
        Raw::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn coerce_array<T>(raw: &Raw, mut each: impl FnMut(&Raw) -> Result<T, String>) -> Result<Vec<T>, String> {
    match raw {
        Raw::Array(items) => items.iter().map(|v| each(v)).collect(),
        other => each(other).map(|v| vec![v]),
    }
}

fn coerce_byte_array(raw: &Raw) -> Result<Vec<u8>, String> {
    match raw {
        Raw::String(s) => base64::decode(s).map_err(|e| e.to_string()),
        Raw::Array(items) => items
            .iter()
            .map(|v| {
                let n = v.as_i64().ok_or_else(|| format!("byte array element {v} is not an integer"))?;
                if n < 0 {
                    Err("negative-not-allowed".to_string())
                } else {
                    Ok((n.min(255)) as u8)
                }
            })
            .collect(),
        other => Err(format!("cannot convert {other} to byte array")),
    }
}

/// Returns `Ok(None)` for the Go zero-time sentinel, which the caller
/// treats as null rather than as an error (spec §4.4).
fn coerce_timestamp(raw: &Raw, default_tz: chrono::FixedOffset) -> Result<Option<DateTime<Utc>>, String> {
    let parsed = match raw {
        Raw::Number(n) => {
            let secs = n.as_i64().ok_or_else(|| format!("timestamp number {n} out of range"))?;
            Utc.timestamp_opt(secs, 0).single()
        }
        Raw::String(s) => parse_timestamp_string(s, default_tz),
        other => return Err(format!("cannot convert {other} to timestamp")),
    };
    let dt = parsed.ok_or_else(|| "no timestamp format matched".to_string())?;

    let zero = NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    if dt.naive_utc() == zero {
        return Ok(None);
    }
    Ok(Some(dt))
}

fn parse_timestamp_string(s: &str, default_tz: chrono::FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            let fixed = default_tz.from_local_datetime(&naive).single()?;
            return Some(fixed.with_timezone(&Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        let fixed = default_tz.from_local_datetime(&naive).single()?;
        return Some(fixed.with_timezone(&Utc));
    }
    None
}

fn coerce_json(raw: &Raw) -> Result<Value, String> {
    match raw {
        Raw::String(s) => {
            if s.is_empty() {
                return Ok(Value::Null);
            }
            match serde_json::from_str::<Raw>(s) {
                Ok(parsed) => Ok(Value::Json(parsed)),
                Err(_) => Ok(Value::Json(Raw::String(s.clone()))),
            }
        }
        other => {
            let serialized = serde_json::to_string(other).map_err(|e| e.to_string())?;
            if serialized.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Json(other.clone()))
            }
        }
    }
}

fn coerce_ip(raw: &Raw) -> Result<IpAddr, String> {
    match raw {
        Raw::String(s) => IpAddr::from_str(s.trim()).map_err(|e| e.to_string()).map(prefer_v4),
        Raw::Array(items) if items.len() == 4 => {
            let mut bytes = [0u8; 4];
            for (i, item) in items.iter().enumerate() {
                bytes[i] = item.as_u64().ok_or_else(|| format!("ip byte {item} is not an integer"))? as u8;
            }
            Ok(IpAddr::V4(Ipv4Addr::from(bytes)))
        }
        other => Err(format!("cannot convert {other} to ip")),
    }
}

fn prefer_v4(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn coerce_cidr(raw: &Raw) -> Result<IpNetwork, String> {
    match raw {
        Raw::String(s) => IpNetwork::from_str(s.trim()).map_err(|e| e.to_string()),
        other => Err(format!("cannot convert {other} to cidr")),
    }
}

fn coerce_mac(raw: &Raw) -> Result<MacAddr6, String> {
    match raw {
        Raw::String(s) => s.trim().parse::<MacAddr6>().map_err(|e| e.to_string()),
        other => Err(format!("cannot convert {other} to mac address")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use schema::Table;

    fn table() -> Table {
        Table::new("t", vec![])
    }

    fn col(name: &str, ty: ColumnType) -> Column {
        Column::new(name, ty)
    }

    #[test]
    fn null_raw_value_is_always_null() {
        let convertor = DefaultConvertor::new();
        let (value, diags) = convertor.convert(&table(), &col("a", ColumnType::Int), &Raw::Null);
        assert_eq!(value, Value::Null);
        assert!(!diags.has_error());
    }

    #[test]
    fn blacklisted_string_is_null_for_non_string_column() {
        let convertor = DefaultConvertor::new();
        let (value, _) = convertor.convert(&table(), &col("a", ColumnType::Int), &Raw::String("N/A".into()));
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn blacklisted_string_passes_through_unchanged_for_string_column() {
        let convertor = DefaultConvertor::new();
        let (value, _) = convertor.convert(&table(), &col("a", ColumnType::String), &Raw::String("N/A".into()));
        assert_eq!(value, Value::String("N/A".into()));
    }

    #[test]
    fn ipv4_prefers_four_byte_form_even_from_mapped_v6() {
        let convertor = DefaultConvertor::new();
        let (value, diags) = convertor.convert(
            &table(),
            &col("a", ColumnType::Ip),
            &Raw::String("::ffff:192.0.2.1".into()),
        );
        assert!(!diags.has_error());
        assert_eq!(value, Value::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));
    }

    #[test]
    fn byte_array_rejects_negative_numbers() {
        let convertor = DefaultConvertor::new();
        let (value, diags) = convertor.convert(
            &table(),
            &col("a", ColumnType::ByteArray),
            &serde_json::json!([1, -2, 3]),
        );
        assert_eq!(value, Value::Null);
        assert!(diags.has_error());
    }

    #[test]
    fn rfc3339_timestamp_round_trips() {
        let convertor = DefaultConvertor::new();
        let (value, diags) = convertor.convert(
            &table(),
            &col("a", ColumnType::Timestamp),
            &Raw::String("2023-05-01T10:30:00Z".into()),
        );
        assert!(!diags.has_error());
        match value {
            Value::Timestamp(dt) => assert_eq!(dt.to_rfc3339(), "2023-05-01T10:30:00+00:00"),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn json_column_serializes_non_string_values() {
        let convertor = DefaultConvertor::new();
        let (value, diags) = convertor.convert(&table(), &col("a", ColumnType::Json), &serde_json::json!({"k": 1}));
        assert!(!diags.has_error());
        assert_eq!(value, Value::Json(serde_json::json!({"k": 1})));
    }
}
