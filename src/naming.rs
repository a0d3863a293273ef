//! Key naming conventions.
//!
//! Conversions work per key-path segment, so `userInfo.firstName` becomes
//! `user_info.first_name` and the separator survives.

use crate::config::KeyConvention;
use crate::types::Record;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static WORD_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)([A-Z][a-z]+)").unwrap());
static LOWER_UPPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-]+").unwrap());
static SPECIAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").unwrap());
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

/// `userName` -> `user_name`, `HTTPResponse` -> `http_response`,
/// `first name` -> `first_name`
pub fn to_snake_case(name: &str) -> String {
    let spaced = SEPARATORS.replace_all(name.trim(), "_");
    let split = WORD_BOUNDARY.replace_all(&spaced, "${1}_${2}");
    let split = LOWER_UPPER.replace_all(&split, "${1}_${2}");
    UNDERSCORES.replace_all(&split, "_").to_lowercase()
}

/// `user_name` -> `userName`. The first word is kept as written.
pub fn to_camel_case(name: &str) -> String {
    let mut parts = name.split('_').filter(|part| !part.is_empty());
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

/// Replace runs of non-word characters with `_`, trimming the ends
pub fn clean_special_chars(name: &str) -> String {
    let cleaned = SPECIAL_CHARS.replace_all(name, "_");
    cleaned.trim_matches('_').to_string()
}

/// Apply `convention` to a single key segment
pub fn normalize_key(key: &str, convention: KeyConvention) -> String {
    match convention {
        KeyConvention::Snake => to_snake_case(key),
        KeyConvention::Camel => to_camel_case(key),
        KeyConvention::Keep => key.to_string(),
    }
}

/// Apply `convention` to every segment of a `separator`-joined key path
pub fn normalize_key_path(key: &str, convention: KeyConvention, separator: &str) -> String {
    if convention == KeyConvention::Keep {
        return key.to_string();
    }
    key.split(separator)
        .map(|segment| normalize_key(segment, convention))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Rename every key of every record.
///
/// When two keys of one record map to the same name a null never replaces a
/// value; between two non-null values the later one wins and a warning is
/// logged.
pub fn normalize_keys(
    records: Vec<Record>,
    convention: KeyConvention,
    separator: &str,
) -> Vec<Record> {
    if convention == KeyConvention::Keep {
        return records;
    }

    records
        .into_iter()
        .map(|record| {
            let mut renamed = Record::with_capacity(record.len());
            for (key, value) in record {
                let name = normalize_key_path(&key, convention, separator);
                match renamed.get(&name) {
                    Some(_) if value.is_null() => continue,
                    Some(existing) if !existing.is_null() => {
                        warn!(key = %key, renamed = %name, "key collision after renaming");
                    }
                    _ => {}
                }
                renamed.insert(name, value);
            }
            renamed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("userName"), "user_name");
        assert_eq!(to_snake_case("UserName"), "user_name");
        assert_eq!(to_snake_case("HTTPResponse"), "http_response");
        assert_eq!(to_snake_case("releaseDate2"), "release_date2");
        assert_eq!(to_snake_case("first name"), "first_name");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("kebab-case-key"), "kebab_case_key");
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(to_camel_case("user_name"), "userName");
        assert_eq!(to_camel_case("parent_id"), "parentId");
        assert_eq!(to_camel_case("user_ID"), "userId");
        assert_eq!(to_camel_case("plain"), "plain");
        assert_eq!(to_camel_case("__a__b"), "aB");
    }

    #[test]
    fn test_clean_special_chars() {
        assert_eq!(clean_special_chars("price ($)"), "price");
        assert_eq!(clean_special_chars("a.b/c"), "a_b_c");
        assert_eq!(clean_special_chars("ok_key"), "ok_key");
    }

    #[test]
    fn test_key_path_keeps_separator() {
        assert_eq!(
            normalize_key_path("userInfo.firstName", KeyConvention::Snake, "."),
            "user_info.first_name"
        );
        assert_eq!(
            normalize_key_path("user_info__first_name", KeyConvention::Camel, "__"),
            "userInfo__firstName"
        );
        assert_eq!(
            normalize_key_path("userInfo.firstName", KeyConvention::Keep, "."),
            "userInfo.firstName"
        );
    }

    #[test]
    fn test_normalize_keys_preserves_order() {
        let records: Vec<Record> =
            serde_json::from_value(json!([{"zLast": 1, "aFirst": 2, "mid.innerKey": 3}])).unwrap();
        let out = normalize_keys(records, KeyConvention::Snake, ".");

        let keys: Vec<&String> = out[0].keys().collect();
        assert_eq!(keys, vec!["z_last", "a_first", "mid.inner_key"]);
    }

    #[test]
    fn test_normalize_keys_collision_keeps_later_value() {
        let records: Vec<Record> =
            serde_json::from_value(json!([{"userName": 1, "user_name": 2}])).unwrap();
        let out = normalize_keys(records, KeyConvention::Snake, ".");

        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0]["user_name"], Value::from(2));
    }

    #[test]
    fn test_normalize_keys_collision_never_keeps_null() {
        let records: Vec<Record> = serde_json::from_value(json!([
            {"id": 1, "userName": "a", "user_name": null},
            {"id": 2, "userName": null, "user_name": "b"}
        ]))
        .unwrap();
        let out = normalize_keys(records, KeyConvention::Snake, ".");

        assert_eq!(out[0]["user_name"], json!("a"));
        assert_eq!(out[1]["user_name"], json!("b"));
        let keys: Vec<&String> = out[0].keys().collect();
        assert_eq!(keys, vec!["id", "user_name"]);
    }
}
