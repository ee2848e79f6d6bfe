use serde_json::Value as Raw;

/// Resolve `path` against `raw`. A leading `/` is treated as an RFC 6901
/// JSON Pointer; anything else is looked up as a single top-level key.
pub fn lookup<'a>(raw: &'a Raw, path: &str) -> Option<&'a Raw> {
    if let Some(stripped) = path.strip_prefix('/') {
        let _ = stripped;
        raw.pointer(path)
    } else {
        raw.get(path)
    }
}

/// `snake_case` -> `camelCase`, the fallback the `Default` extractor tries
/// when a raw result uses camel-cased API field names (spec §4.3).
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut capitalize_next = false;
    for ch in name.chars() {
        if ch == '_' {
            capitalize_next = true;
            continue;
        }
        if capitalize_next {
            out.extend(ch.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// MD5 of `values`, each as a display string, joined by `" | "` (spec
/// §4.3: `ParentPrimaryKeysID`, `PrimaryKeysID`, `ColumnsValueMd5`).
pub fn md5_join(values: &[String]) -> String {
    let joined = values.join(" | ");
    format!("{:x}", md5::compute(joined.as_bytes()))
}

pub fn value_to_display(value: &row::Value) -> String {
    match value {
        row::Value::Null => String::new(),
        row::Value::Bool(b) => b.to_string(),
        row::Value::SmallInt(v) => v.to_string(),
        row::Value::Int(v) => v.to_string(),
        row::Value::BigInt(v) => v.to_string(),
        row::Value::Float(v) => v.to_string(),
        row::Value::String(v) => v.clone(),
        row::Value::Bytes(v) => format!("{v:?}"),
        row::Value::IntArray(v) => format!("{v:?}"),
        row::Value::StringArray(v) => format!("{v:?}"),
        row::Value::Timestamp(v) => v.to_rfc3339(),
        row::Value::Json(v) => v.to_string(),
        row::Value::Ip(v) => v.to_string(),
        row::Value::IpArray(v) => format!("{v:?}"),
        row::Value::Cidr(v) => v.to_string(),
        row::Value::CidrArray(v) => format!("{v:?}"),
        row::Value::Mac(v) => v.to_string(),
        row::Value::MacArray(v) => format!("{v:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn camel_case_converts_snake_case() {
        assert_eq!(to_camel_case("test_id"), "testId");
        assert_eq!(to_camel_case("name"), "name");
    }

    #[test]
    fn pointer_lookup_resolves_nested_path() {
        let raw = serde_json::json!({"a": {"b": 1}});
        assert_eq!(lookup(&raw, "/a/b"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn plain_key_lookup_resolves_top_level_field() {
        let raw = serde_json::json!({"Name": "Tom"});
        assert_eq!(lookup(&raw, "Name"), Some(&serde_json::json!("Tom")));
    }
}
