//! Key Codec
//!
//! Bidirectional mapping between a document's user-visible key value and
//! the storage key it lives under, plus construction of lookup-document
//! keys for indexed fields.
//!
//! Layout:
//!
//! - primary:  `<prefix><value><suffix>`
//! - lookup:   `<keyPrefix><refIndexKeyPrefix><indexName><delimiter><value><keySuffix>`
//!
//! Field-level prefix/suffix overrides win over schema-level ones. The
//! delimiter may never occur inside a user key value; that is what keeps
//! `user_key` the exact inverse of `storage_key`.

use serde_json::Value;
use thiserror::Error;

use crate::models::field::FieldDescriptor;
use crate::models::schema::Schema;

/// Key construction errors, raised synchronously before any store call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The user value cannot be part of a key
    #[error("Invalid key value '{value}': {reason}")]
    InvalidKey { value: String, reason: String },
}

impl KeyError {
    pub fn invalid(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Render a user key value as a key segment
///
/// Strings pass through; numbers use their base-10 representation.
/// Anything else is not a key value. The schema delimiter may not occur
/// in the result.
pub fn stringify(value: &Value, delimiter: &str) -> Result<String, KeyError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(KeyError::invalid(
                other.to_string(),
                "key values must be strings or numbers",
            ))
        }
    };
    if !delimiter.is_empty() && text.contains(delimiter) {
        return Err(KeyError::invalid(
            text,
            format!("key values may not contain the delimiter '{delimiter}'"),
        ));
    }
    Ok(text)
}

fn affixes<'a>(field: &'a FieldDescriptor, schema: &'a Schema) -> (&'a str, &'a str) {
    let key = field.key.as_ref();
    let prefix = key
        .and_then(|k| k.prefix.as_deref())
        .or(schema.resolved().key_prefix.as_deref())
        .unwrap_or("");
    let suffix = key
        .and_then(|k| k.suffix.as_deref())
        .or(schema.resolved().key_suffix.as_deref())
        .unwrap_or("");
    (prefix, suffix)
}

/// Expand a user-visible key value into its storage key
pub fn storage_key(
    user_value: &Value,
    field: &FieldDescriptor,
    schema: &Schema,
) -> Result<String, KeyError> {
    let (prefix, suffix) = affixes(field, schema);
    let body = stringify(user_value, &schema.resolved().delimiter)?;
    Ok(format!("{prefix}{body}{suffix}"))
}

/// Recover the user-visible key value from a storage key
///
/// Inverse of [`storage_key`]: strips whichever affixes apply to the key
/// field. A key that does not carry the expected affixes is returned
/// unchanged (it was stored un-expanded).
pub fn user_key(storage: &str, field: &FieldDescriptor, schema: &Schema) -> String {
    let (prefix, suffix) = affixes(field, schema);
    let body = storage.strip_prefix(prefix).unwrap_or(storage);
    let body = body.strip_suffix(suffix).unwrap_or(body);
    body.to_string()
}

/// Build the lookup-document key for an indexed value
pub fn ref_key(index_name: &str, value: &Value, schema: &Schema) -> Result<String, KeyError> {
    let resolved = schema.resolved();
    let body = stringify(value, &resolved.delimiter)?;
    let prefix = resolved.key_prefix.as_deref().unwrap_or("");
    let suffix = resolved.key_suffix.as_deref().unwrap_or("");
    Ok(format!(
        "{prefix}{ref_prefix}{index_name}{delimiter}{body}{suffix}",
        ref_prefix = resolved.ref_index_key_prefix,
        delimiter = resolved.delimiter,
    ))
}

/// Derive a lookup name from a field name
///
/// Singularizes by stripping one trailing `s` (when longer than one
/// character), then camel-cases across `_`, `-`, and spaces.
pub fn derive_index_name(field_name: &str) -> String {
    let singular = match field_name.strip_suffix('s') {
        Some(stem) if field_name.len() > 1 => stem,
        _ => field_name,
    };

    let mut out = String::with_capacity(singular.len());
    for (i, part) in singular
        .split(|c: char| c == '_' || c == '-' || c == ' ')
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::field::KeyOptions;
    use crate::models::schema::{Schema, SchemaOptions};
    use serde_json::json;

    fn schema_with(options: SchemaOptions) -> Schema {
        let mut schema = Schema::with_options(options);
        schema.add(FieldDescriptor::string("email").key_with(KeyOptions::provided()));
        schema.compile(&Config::default()).unwrap();
        schema
    }

    #[test]
    fn stringify_accepts_strings_and_numbers() {
        assert_eq!(stringify(&json!("bob"), "_").unwrap(), "bob");
        assert_eq!(stringify(&json!(42), "_").unwrap(), "42");
        assert!(stringify(&json!(true), "_").is_err());
        assert!(stringify(&json!({"a": 1}), "_").is_err());
    }

    #[test]
    fn stringify_rejects_delimiter_substring() {
        let err = stringify(&json!("a_b"), "_").unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey { .. }));
        assert!(stringify(&json!("a_b"), "::").is_ok());
    }

    #[test]
    fn storage_key_applies_schema_affixes() {
        let schema = schema_with(SchemaOptions {
            key_prefix: Some("user::".to_string()),
            key_suffix: Some("::v1".to_string()),
            delimiter: Some("::".to_string()),
            ..Default::default()
        });
        let field = schema.key_field().unwrap();
        let key = storage_key(&json!("bob"), field, &schema).unwrap();
        assert_eq!(key, "user::bob::v1");
    }

    #[test]
    fn field_affixes_override_schema_affixes() {
        let mut schema = Schema::with_options(SchemaOptions {
            key_prefix: Some("user::".to_string()),
            ..Default::default()
        });
        schema.add(FieldDescriptor::string("email").key_with(KeyOptions {
            generate: false,
            prefix: Some("member::".to_string()),
            suffix: None,
        }));
        schema.compile(&Config::default()).unwrap();

        let field = schema.key_field().unwrap();
        let key = storage_key(&json!("b@x"), field, &schema).unwrap();
        assert_eq!(key, "member::b@x");
    }

    #[test]
    fn user_key_inverts_storage_key() {
        let schema = schema_with(SchemaOptions {
            key_prefix: Some("user::".to_string()),
            key_suffix: Some("::v1".to_string()),
            delimiter: Some("::".to_string()),
            ..Default::default()
        });
        let field = schema.key_field().unwrap();
        for value in ["bob", "a@b.c", "42"] {
            let storage = storage_key(&json!(value), field, &schema).unwrap();
            assert_eq!(user_key(&storage, field, &schema), value);
        }
    }

    #[test]
    fn ref_key_layout() {
        let schema = schema_with(SchemaOptions {
            key_prefix: Some("user::".to_string()),
            delimiter: Some("::".to_string()),
            ..Default::default()
        });
        let key = ref_key("email", &json!("a@b"), &schema).unwrap();
        assert_eq!(key, "user::$_ref_by_email::a@b");
    }

    #[test]
    fn derived_index_names() {
        assert_eq!(derive_index_name("usernames"), "username");
        assert_eq!(derive_index_name("email"), "email");
        assert_eq!(derive_index_name("s"), "s");
        assert_eq!(derive_index_name("login_tokens"), "loginToken");
    }
}
