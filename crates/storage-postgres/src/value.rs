//! Bridges `row::Value` to sqlx's Postgres bind/decode surface. Binding
//! is straightforward (the caller always knows the Rust type). Decoding
//! an arbitrary `Query`/`Exec` result is not: there is no schema to
//! consult, so columns are dispatched on the Postgres type name the
//! driver itself reports.

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use macaddr::MacAddr6;
use row::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column as _, Postgres, Row as _, TypeInfo};

/// Bind one `Value` as the next positional parameter of `query`.
pub fn bind_value<'q>(query: Query<'q, Postgres, PgArguments>, value: &'q Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::SmallInt(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::BigInt(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::String(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::IntArray(v) => query.bind(v.as_slice()),
        Value::StringArray(v) => query.bind(v.as_slice()),
        Value::Timestamp(v) => query.bind(v.naive_utc()),
        Value::Json(v) => query.bind(v.clone()),
        Value::Ip(v) => query.bind(IpNetwork::from(*v)),
        Value::IpArray(v) => query.bind(v.iter().map(|ip| IpNetwork::from(*ip)).collect::<Vec<_>>()),
        Value::Cidr(v) => query.bind(*v),
        Value::CidrArray(v) => query.bind(v.clone()),
        Value::Mac(v) => query.bind(v.to_string()),
        Value::MacArray(v) => query.bind(v.iter().map(|m| m.to_string()).collect::<Vec<_>>()),
    }
}

/// Decode one column of `row` into a `row::Value`, dispatching on the
/// Postgres type name the driver reports for that column.
pub fn decode_column(pg_row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
    let type_name = pg_row.column(idx).type_info().name().to_uppercase();
    match type_name.as_str() {
        "BOOL" => get_nullable::<bool>(pg_row, idx).map(|v| v.map(Value::Bool).unwrap_or(Value::Null)),
        "INT2" => get_nullable::<i16>(pg_row, idx).map(|v| v.map(Value::SmallInt).unwrap_or(Value::Null)),
        "INT4" => get_nullable::<i32>(pg_row, idx).map(|v| v.map(Value::Int).unwrap_or(Value::Null)),
        "INT8" => get_nullable::<i64>(pg_row, idx).map(|v| v.map(Value::BigInt).unwrap_or(Value::Null)),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => get_nullable::<f64>(pg_row, idx).map(|v| v.map(Value::Float).unwrap_or(Value::Null)),
        "BYTEA" => get_nullable::<Vec<u8>>(pg_row, idx).map(|v| v.map(Value::Bytes).unwrap_or(Value::Null)),
        "_INT4" => get_nullable::<Vec<i32>>(pg_row, idx).map(|v| v.map(Value::IntArray).unwrap_or(Value::Null)),
        "_TEXT" | "_VARCHAR" => get_nullable::<Vec<String>>(pg_row, idx).map(|v| v.map(Value::StringArray).unwrap_or(Value::Null)),
        "TIMESTAMP" | "TIMESTAMPTZ" => {
            get_nullable::<chrono::NaiveDateTime>(pg_row, idx).map(|v| v.map(to_utc).map(Value::Timestamp).unwrap_or(Value::Null))
        }
        "JSON" | "JSONB" => get_nullable::<serde_json::Value>(pg_row, idx).map(|v| v.map(Value::Json).unwrap_or(Value::Null)),
        "INET" => get_nullable::<IpNetwork>(pg_row, idx).map(|v| v.map(|n| Value::Ip(n.ip())).unwrap_or(Value::Null)),
        "_INET" => {
            get_nullable::<Vec<IpNetwork>>(pg_row, idx).map(|v| v.map(|ns| Value::IpArray(ns.iter().map(|n| n.ip()).collect())).unwrap_or(Value::Null))
        }
        "CIDR" => get_nullable::<IpNetwork>(pg_row, idx).map(|v| v.map(Value::Cidr).unwrap_or(Value::Null)),
        "_CIDR" => get_nullable::<Vec<IpNetwork>>(pg_row, idx).map(|v| v.map(Value::CidrArray).unwrap_or(Value::Null)),
        "MACADDR" => get_nullable::<String>(pg_row, idx).map(|v| v.and_then(|s| s.parse::<MacAddr6>().ok()).map(Value::Mac).unwrap_or(Value::Null)),
        _ => get_nullable::<String>(pg_row, idx).map(|v| v.map(Value::String).unwrap_or(Value::Null)),
    }
}

fn to_utc(naive: chrono::NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

fn get_nullable<'r, T>(pg_row: &'r PgRow, idx: usize) -> Result<Option<T>, sqlx::Error>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    pg_row.try_get::<Option<T>, _>(idx)
}

/// Column names for a decoded row, in positional order.
pub fn column_names(pg_row: &PgRow) -> Vec<String> {
    pg_row.columns().iter().map(|c| c.name().to_string()).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn to_utc_preserves_instant() {
        let naive = chrono::NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        let dt = to_utc(naive);
        assert_eq!(dt.to_rfc3339(), "2023-05-01T10:30:00+00:00");
    }
}
