//! Field Descriptors
//!
//! The typed field system schemas are built from. Each field carries a
//! [`FieldKind`] (the semantic type plus per-type constraints) and the
//! cross-cutting attributes: defaults, transforms, validators, visibility,
//! key and index membership.
//!
//! Constraint enforcement happens in the value layer
//! (`models/value.rs`); descriptors only declare.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::models::document::Document;
use crate::models::schema::Schema;

/// Pre-typecast transform applied to every incoming value
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Per-field validator; returning `false` cancels the write
pub type ValidateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Read-side getter applied when a field is projected
pub type GetterFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Custom string normalizer run during typecast
pub type StringTransformFn = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Default evaluated in document context when a field is unset at creation
pub type ComputedDefaultFn = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

/// A field default: a fixed value or a thunk over the document being built
#[derive(Clone)]
pub enum DefaultValue {
    Fixed(Value),
    Computed(ComputedDefaultFn),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "Fixed({v})"),
            Self::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// Constraints for string-typed fields
#[derive(Clone, Default)]
pub struct StringConstraints {
    /// Values must match this pattern, compiled once at schema build time
    pub pattern: Option<Regex>,

    /// Closed set of accepted values
    pub enum_values: Option<Vec<String>>,

    /// Minimum length in characters
    pub min_length: Option<usize>,

    /// Maximum length in characters
    pub max_length: Option<usize>,

    /// Truncate to `max_length` instead of rejecting
    pub clip: bool,

    /// Custom normalizer applied before constraint checks
    pub transform: Option<StringTransformFn>,
}

impl fmt::Debug for StringConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringConstraints")
            .field("pattern", &self.pattern.as_ref().map(|r| r.as_str()))
            .field("enum_values", &self.enum_values)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("clip", &self.clip)
            .field("transform", &self.transform.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Constraints for number-typed fields
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumberConstraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Constraints for array-typed fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayConstraints {
    /// Drop duplicate elements, keeping first occurrence order
    pub unique: bool,
}

/// Key-field attributes
///
/// Present only on the schema's key field. `generate` defaults to true:
/// an unset key value is filled with a v4 UUID at creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOptions {
    pub generate: bool,

    /// Overrides the schema-level key prefix for this field only
    pub prefix: Option<String>,

    /// Overrides the schema-level key suffix for this field only
    pub suffix: Option<String>,
}

impl KeyOptions {
    pub fn generated() -> Self {
        Self {
            generate: true,
            ..Self::default()
        }
    }

    pub fn provided() -> Self {
        Self {
            generate: false,
            ..Self::default()
        }
    }
}

/// The semantic type of a field
#[derive(Clone)]
pub enum FieldKind {
    String(StringConstraints),
    Number(NumberConstraints),
    Boolean,
    Date,
    /// No typecast; stores arbitrary JSON
    Any,
    /// Homogeneous array; elements follow the inner descriptor
    Array {
        element: Box<FieldDescriptor>,
        constraints: ArrayConstraints,
    },
    /// Nested object validated against an inline sub-schema
    Object(Arc<Schema>),
    /// Embedded document of the named model, held hydrated or as its key
    Reference { model: String },
    /// Reads and writes pass through to the target field
    Alias { target: String },
}

impl FieldKind {
    /// Short name for error messages and logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Any => "any",
            Self::Array { .. } => "array",
            Self::Object(_) => "object",
            Self::Reference { .. } => "reference",
            Self::Alias { .. } => "alias",
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array { element, .. } => write!(f, "array<{}>", element.kind.type_name()),
            Self::Reference { model } => write!(f, "reference<{model}>"),
            Self::Alias { target } => write!(f, "alias<{target}>"),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// A single schema field: semantic type plus cross-cutting attributes
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub default: Option<DefaultValue>,
    pub transform: Option<TransformFn>,
    pub validator: Option<ValidateFn>,
    pub getter: Option<GetterFn>,

    /// Writable only by hydration and defaults, never by `set`
    pub read_only: bool,

    /// Excluded from `to_object`/`to_json` output
    pub invisible: bool,

    /// Maintain a lookup document per distinct value of this field
    pub index: bool,

    /// Lookup name; derived from the field name when absent
    pub index_name: Option<String>,

    /// Present iff this is the schema's key field
    pub key: Option<KeyOptions>,
}

impl FieldDescriptor {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            transform: None,
            validator: None,
            getter: None,
            read_only: false,
            invisible: false,
            index: false,
            index_name: None,
            key: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String(StringConstraints::default()))
    }

    pub fn string_with(name: impl Into<String>, constraints: StringConstraints) -> Self {
        Self::new(name, FieldKind::String(constraints))
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number(NumberConstraints::default()))
    }

    pub fn number_with(name: impl Into<String>, constraints: NumberConstraints) -> Self {
        Self::new(name, FieldKind::Number(constraints))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Any)
    }

    pub fn array_of(name: impl Into<String>, element: FieldDescriptor) -> Self {
        Self::new(
            name,
            FieldKind::Array {
                element: Box::new(element),
                constraints: ArrayConstraints::default(),
            },
        )
    }

    pub fn unique_array_of(name: impl Into<String>, element: FieldDescriptor) -> Self {
        Self::new(
            name,
            FieldKind::Array {
                element: Box::new(element),
                constraints: ArrayConstraints { unique: true },
            },
        )
    }

    pub fn object(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldKind::Object(Arc::new(schema)))
    }

    pub fn reference(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                model: model.into(),
            },
        )
    }

    pub fn alias(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Alias {
                target: target.into(),
            },
        )
    }

    // Chainable attribute setters

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Fixed(value));
        self
    }

    pub fn with_computed_default(
        mut self,
        f: impl Fn(&Document) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default = Some(DefaultValue::Computed(Arc::new(f)));
        self
    }

    pub fn with_transform(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    pub fn with_validator(mut self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn with_getter(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.getter = Some(Arc::new(f));
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn invisible(mut self) -> Self {
        self.invisible = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn indexed_as(mut self, index_name: impl Into<String>) -> Self {
        self.index = true;
        self.index_name = Some(index_name.into());
        self
    }

    /// Mark this field as the schema key, auto-generated when unset
    pub fn key(self) -> Self {
        self.key_with(KeyOptions::generated())
    }

    pub fn key_with(mut self, options: KeyOptions) -> Self {
        self.key = Some(options);
        self
    }

    /// Whether this field is the schema's key field
    pub fn is_key(&self) -> bool {
        self.key.is_some()
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("read_only", &self.read_only)
            .field("invisible", &self.invisible)
            .field("index", &self.index)
            .field("key", &self.key)
            .finish()
    }
}
