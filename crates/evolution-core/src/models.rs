//! Schema signature model shared by the differ, mutations and history store.
//!
//! A [`ProjectSignature`] is the canonical, comparable description of a
//! schema: application label -> model name -> field name -> field.  Every
//! type here is a plain value with structural equality; mutations simulate
//! against a `clone()` and never touch the original.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::{EvolutionError, EvolutionResult};

// ---------------------------------------------------------------------------
// Schema / contract constants
// ---------------------------------------------------------------------------

/// Format version written into every serialized signature.
pub const SIGNATURE_VERSION: u32 = 1;

/// Text of the placeholder a human must replace before a hinted mutation can
/// be executed.
pub const USER_VALUE_REQUIRED: &str = "<<USER VALUE REQUIRED>>";

fn is_false(value: &bool) -> bool {
    !*value
}

/// Split an `"app_label.ModelName"` reference into its two halves.
pub fn split_model_ref(reference: &str) -> Option<(&str, &str)> {
    reference
        .split_once('.')
        .filter(|(app, model)| !app.is_empty() && !model.is_empty())
}

// ---------------------------------------------------------------------------
// 1. FieldKind
// ---------------------------------------------------------------------------

/// Closed set of field types a signature can describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Auto,
    BigAuto,
    Integer,
    BigInteger,
    SmallInteger,
    PositiveInteger,
    PositiveSmallInteger,
    Boolean,
    Char,
    Text,
    Slug,
    Email,
    Date,
    DateTime,
    Time,
    Decimal,
    Float,
    ForeignKey,
    OneToOne,
    ManyToMany,
}

/// Static properties of a [`FieldKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindTraits {
    /// A new non-nullable column of this kind needs a value for existing rows.
    pub requires_initial_value: bool,
    /// The kind maps to a column that can carry an index.
    pub supports_index: bool,
    /// The kind references another model.
    pub is_relational: bool,
}

impl FieldKind {
    pub fn traits(self) -> KindTraits {
        match self {
            FieldKind::ManyToMany => KindTraits {
                requires_initial_value: false,
                supports_index: false,
                is_relational: true,
            },
            FieldKind::ForeignKey | FieldKind::OneToOne => KindTraits {
                requires_initial_value: true,
                supports_index: true,
                is_relational: true,
            },
            FieldKind::Text => KindTraits {
                requires_initial_value: true,
                supports_index: false,
                is_relational: false,
            },
            _ => KindTraits {
                requires_initial_value: true,
                supports_index: true,
                is_relational: false,
            },
        }
    }

    pub fn is_many_to_many(self) -> bool {
        self == FieldKind::ManyToMany
    }

    /// Relations stored as a `<name>_id` column on the owning table.
    pub fn is_foreign_key(self) -> bool {
        matches!(self, FieldKind::ForeignKey | FieldKind::OneToOne)
    }

    pub fn is_auto(self) -> bool {
        matches!(self, FieldKind::Auto | FieldKind::BigAuto)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Auto => "auto",
            FieldKind::BigAuto => "big_auto",
            FieldKind::Integer => "integer",
            FieldKind::BigInteger => "big_integer",
            FieldKind::SmallInteger => "small_integer",
            FieldKind::PositiveInteger => "positive_integer",
            FieldKind::PositiveSmallInteger => "positive_small_integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Char => "char",
            FieldKind::Text => "text",
            FieldKind::Slug => "slug",
            FieldKind::Email => "email",
            FieldKind::Date => "date",
            FieldKind::DateTime => "date_time",
            FieldKind::Time => "time",
            FieldKind::Decimal => "decimal",
            FieldKind::Float => "float",
            FieldKind::ForeignKey => "foreign_key",
            FieldKind::OneToOne => "one_to_one",
            FieldKind::ManyToMany => "many_to_many",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 2. Attribute catalogue
// ---------------------------------------------------------------------------

/// Every attribute a field signature carries, in comparison order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Kind,
    Nullable,
    PrimaryKey,
    Unique,
    Indexed,
    MaxLength,
    MaxDigits,
    DecimalPlaces,
    ColumnName,
    DbTable,
    RelatedModel,
    ThroughModel,
    Tablespace,
}

impl Attribute {
    pub const ALL: [Attribute; 13] = [
        Attribute::Kind,
        Attribute::Nullable,
        Attribute::PrimaryKey,
        Attribute::Unique,
        Attribute::Indexed,
        Attribute::MaxLength,
        Attribute::MaxDigits,
        Attribute::DecimalPlaces,
        Attribute::ColumnName,
        Attribute::DbTable,
        Attribute::RelatedModel,
        Attribute::ThroughModel,
        Attribute::Tablespace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Kind => "kind",
            Attribute::Nullable => "nullable",
            Attribute::PrimaryKey => "primary_key",
            Attribute::Unique => "unique",
            Attribute::Indexed => "indexed",
            Attribute::MaxLength => "max_length",
            Attribute::MaxDigits => "max_digits",
            Attribute::DecimalPlaces => "decimal_places",
            Attribute::ColumnName => "column_name",
            Attribute::DbTable => "db_table",
            Attribute::RelatedModel => "related_model",
            Attribute::ThroughModel => "through_model",
            Attribute::Tablespace => "tablespace",
        }
    }

    /// Value an unset attribute takes.
    pub fn default_value(self) -> Value {
        match self {
            Attribute::Nullable | Attribute::PrimaryKey | Attribute::Unique | Attribute::Indexed => {
                Value::Bool(false)
            }
            _ => Value::Null,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 3. FieldSignature
// ---------------------------------------------------------------------------

/// One schema field: its kind plus the attributes that, together, fully
/// determine the physical column (or association table) it maps to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSignature {
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_digits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    /// Association table override (many-to-many only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablespace: Option<String>,
}

impl FieldSignature {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: false,
            primary_key: false,
            unique: false,
            indexed: false,
            max_length: None,
            max_digits: None,
            decimal_places: None,
            column_name: None,
            db_table: None,
            related_model: None,
            through_model: None,
            tablespace: None,
        }
    }

    pub fn with_null(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_digits(mut self, max_digits: u32, decimal_places: u32) -> Self {
        self.max_digits = Some(max_digits);
        self.decimal_places = Some(decimal_places);
        self
    }

    pub fn with_column(mut self, column_name: &str) -> Self {
        self.column_name = Some(column_name.to_string());
        self
    }

    pub fn with_db_table(mut self, db_table: &str) -> Self {
        self.db_table = Some(db_table.to_string());
        self
    }

    pub fn with_related(mut self, related_model: &str) -> Self {
        self.related_model = Some(related_model.to_string());
        self
    }

    pub fn with_through(mut self, through_model: &str) -> Self {
        self.through_model = Some(through_model.to_string());
        self
    }

    /// Physical column for a field stored on the model's own table, or `None`
    /// for many-to-many fields.
    pub fn column(&self, field_name: &str) -> Option<String> {
        if self.kind.is_many_to_many() {
            return None;
        }
        Some(match &self.column_name {
            Some(column) => column.clone(),
            None if self.kind.is_foreign_key() => format!("{field_name}_id"),
            None => field_name.to_string(),
        })
    }

    /// True when adding this field to a populated table needs a value for
    /// the existing rows.
    pub fn requires_initial_value(&self) -> bool {
        self.kind.traits().requires_initial_value && !self.nullable
    }

    /// Current value of `attr`, with the documented default when unset.
    pub fn attribute(&self, attr: Attribute) -> Value {
        fn opt_u32(v: Option<u32>) -> Value {
            v.map(Value::from).unwrap_or(Value::Null)
        }
        fn opt_str(v: &Option<String>) -> Value {
            v.clone().map(Value::String).unwrap_or(Value::Null)
        }
        match attr {
            Attribute::Kind => Value::String(self.kind.as_str().to_string()),
            Attribute::Nullable => Value::Bool(self.nullable),
            Attribute::PrimaryKey => Value::Bool(self.primary_key),
            Attribute::Unique => Value::Bool(self.unique),
            Attribute::Indexed => Value::Bool(self.indexed),
            Attribute::MaxLength => opt_u32(self.max_length),
            Attribute::MaxDigits => opt_u32(self.max_digits),
            Attribute::DecimalPlaces => opt_u32(self.decimal_places),
            Attribute::ColumnName => opt_str(&self.column_name),
            Attribute::DbTable => opt_str(&self.db_table),
            Attribute::RelatedModel => opt_str(&self.related_model),
            Attribute::ThroughModel => opt_str(&self.through_model),
            Attribute::Tablespace => opt_str(&self.tablespace),
        }
    }

    /// Overwrite `attr` with `value`.  `null` resets optional attributes to
    /// their default; a value of the wrong shape is rejected.
    pub fn set_attribute(&mut self, attr: Attribute, value: &Value) -> Result<(), String> {
        fn as_bool(attr: Attribute, value: &Value) -> Result<bool, String> {
            match value {
                Value::Bool(b) => Ok(*b),
                Value::Null => Ok(false),
                other => Err(format!("attribute '{attr}' expects a boolean, got {other}")),
            }
        }
        fn as_u32(attr: Attribute, value: &Value) -> Result<Option<u32>, String> {
            match value {
                Value::Null => Ok(None),
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .map(Some)
                    .ok_or_else(|| format!("attribute '{attr}' expects a positive integer, got {n}")),
                other => Err(format!("attribute '{attr}' expects an integer, got {other}")),
            }
        }
        fn as_str(attr: Attribute, value: &Value) -> Result<Option<String>, String> {
            match value {
                Value::Null => Ok(None),
                Value::String(s) => Ok(Some(s.clone())),
                other => Err(format!("attribute '{attr}' expects a string, got {other}")),
            }
        }

        match attr {
            Attribute::Kind => {
                self.kind = serde_json::from_value(value.clone())
                    .map_err(|e| format!("attribute 'kind' expects a field kind: {e}"))?;
            }
            Attribute::Nullable => self.nullable = as_bool(attr, value)?,
            Attribute::PrimaryKey => self.primary_key = as_bool(attr, value)?,
            Attribute::Unique => self.unique = as_bool(attr, value)?,
            Attribute::Indexed => self.indexed = as_bool(attr, value)?,
            Attribute::MaxLength => self.max_length = as_u32(attr, value)?,
            Attribute::MaxDigits => self.max_digits = as_u32(attr, value)?,
            Attribute::DecimalPlaces => self.decimal_places = as_u32(attr, value)?,
            Attribute::ColumnName => self.column_name = as_str(attr, value)?,
            Attribute::DbTable => self.db_table = as_str(attr, value)?,
            Attribute::RelatedModel => self.related_model = as_str(attr, value)?,
            Attribute::ThroughModel => self.through_model = as_str(attr, value)?,
            Attribute::Tablespace => self.tablespace = as_str(attr, value)?,
        }
        Ok(())
    }

    /// Attributes whose value differs from the default, in catalogue order.
    /// `kind` is always included.
    pub fn explicit_attributes(&self) -> Vec<(Attribute, Value)> {
        Attribute::ALL
            .iter()
            .filter_map(|&attr| {
                let value = self.attribute(attr);
                (attr == Attribute::Kind || value != attr.default_value()).then_some((attr, value))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 4. ModelSignature
// ---------------------------------------------------------------------------

/// Table-level metadata of a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub db_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_tablespace: Option<String>,
    pub pk_column: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_together: Vec<Vec<String>>,
    /// Reference-only model owned elsewhere; exempt from the primary-key rule.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stub: bool,
}

impl ModelMeta {
    /// Unique-together as a set of non-empty tuples.
    pub fn unique_together_set(&self) -> BTreeSet<Vec<String>> {
        self.unique_together
            .iter()
            .filter(|tuple| !tuple.is_empty())
            .cloned()
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub meta: ModelMeta,
    #[serde(default)]
    pub fields: IndexMap<String, FieldSignature>,
}

impl ModelSignature {
    pub fn new(db_table: &str) -> Self {
        Self {
            meta: ModelMeta {
                db_table: db_table.to_string(),
                db_tablespace: None,
                pk_column: "id".to_string(),
                unique_together: Vec::new(),
                stub: false,
            },
            fields: IndexMap::new(),
        }
    }

    /// Append a field.  A primary-key field also updates `meta.pk_column`.
    pub fn with_field(mut self, name: &str, field: FieldSignature) -> Self {
        if field.primary_key {
            if let Some(column) = field.column(name) {
                self.meta.pk_column = column;
            }
        }
        self.fields.insert(name.to_string(), field);
        self
    }

    pub fn with_unique_together(mut self, fields: &[&str]) -> Self {
        self.meta
            .unique_together
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSignature> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldSignature> {
        self.fields.get_mut(name)
    }

    pub fn primary_key_field(&self) -> Option<(&str, &FieldSignature)> {
        self.fields
            .iter()
            .find(|(_, f)| f.primary_key)
            .map(|(name, f)| (name.as_str(), f))
    }

    /// Check the model-level invariants.
    pub fn validate(&self, app_label: &str, model_name: &str) -> EvolutionResult<()> {
        let pk_count = self.fields.values().filter(|f| f.primary_key).count();
        if !self.meta.stub && pk_count != 1 {
            return Err(EvolutionError::InvalidSignature(format!(
                "model {app_label}.{model_name} has {pk_count} primary key fields, expected exactly one"
            )));
        }
        for tuple in &self.meta.unique_together {
            if let Some(missing) = tuple.iter().find(|name| !self.fields.contains_key(*name)) {
                return Err(EvolutionError::InvalidSignature(format!(
                    "unique_together of {app_label}.{model_name} references unknown field '{missing}'"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 5. ApplicationSignature / ProjectSignature
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationSignature {
    pub models: BTreeMap<String, ModelSignature>,
}

impl ApplicationSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: &str, model: ModelSignature) -> Self {
        self.models.insert(name.to_string(), model);
        self
    }

    pub fn model(&self, name: &str) -> Option<&ModelSignature> {
        self.models.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// The unit persisted as a historical snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectSignature {
    pub apps: BTreeMap<String, ApplicationSignature>,
}

#[derive(Serialize, Deserialize)]
struct SignatureEnvelope {
    version: u32,
    apps: ProjectSignature,
}

impl ProjectSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, label: &str, app: ApplicationSignature) -> Self {
        self.apps.insert(label.to_string(), app);
        self
    }

    pub fn app(&self, label: &str) -> Option<&ApplicationSignature> {
        self.apps.get(label)
    }

    pub fn app_mut(&mut self, label: &str) -> Option<&mut ApplicationSignature> {
        self.apps.get_mut(label)
    }

    pub fn model(&self, app_label: &str, model_name: &str) -> Option<&ModelSignature> {
        self.apps.get(app_label)?.models.get(model_name)
    }

    pub fn model_mut(&mut self, app_label: &str, model_name: &str) -> Option<&mut ModelSignature> {
        self.apps.get_mut(app_label)?.models.get_mut(model_name)
    }

    pub fn field(&self, app_label: &str, model_name: &str, field_name: &str) -> Option<&FieldSignature> {
        self.model(app_label, model_name)?.fields.get(field_name)
    }

    /// Resolve an `"app.Model"` reference.
    pub fn resolve(&self, reference: &str) -> Option<&ModelSignature> {
        let (app, model) = split_model_ref(reference)?;
        self.model(app, model)
    }

    pub fn insert_model(&mut self, app_label: &str, model_name: &str, model: ModelSignature) {
        self.apps
            .entry(app_label.to_string())
            .or_default()
            .models
            .insert(model_name.to_string(), model);
    }

    pub fn app_labels(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    pub fn validate(&self) -> EvolutionResult<()> {
        for (app_label, app) in &self.apps {
            for (model_name, model) in &app.models {
                model.validate(app_label, model_name)?;
            }
        }
        Ok(())
    }

    /// Serialize into the storable form (versioned JSON).
    pub fn to_json(&self) -> EvolutionResult<String> {
        let envelope = SignatureEnvelope {
            version: SIGNATURE_VERSION,
            apps: self.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn from_json(raw: &str) -> EvolutionResult<Self> {
        let envelope: SignatureEnvelope = serde_json::from_str(raw)?;
        if envelope.version != SIGNATURE_VERSION {
            return Err(EvolutionError::InvalidSignature(format!(
                "unsupported signature version {} (expected {SIGNATURE_VERSION})",
                envelope.version
            )));
        }
        Ok(envelope.apps)
    }

    /// SHA-256 hex digest of the serialized signature.
    pub fn fingerprint(&self) -> EvolutionResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json()?.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ---------------------------------------------------------------------------
// 6. InitialValue
// ---------------------------------------------------------------------------

/// Value used to populate existing rows when a column becomes non-nullable.
///
/// Serialized as the literal JSON value, or as the [`USER_VALUE_REQUIRED`]
/// text for the placeholder left by hinting.
#[derive(Clone, Debug, PartialEq)]
pub enum InitialValue {
    Literal(Value),
    UserValueRequired,
}

impl InitialValue {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, InitialValue::UserValueRequired)
    }
}

impl fmt::Display for InitialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialValue::Literal(value) => write!(f, "{value}"),
            InitialValue::UserValueRequired => f.write_str(USER_VALUE_REQUIRED),
        }
    }
}

impl Serialize for InitialValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            InitialValue::Literal(value) => value.serialize(serializer),
            InitialValue::UserValueRequired => serializer.serialize_str(USER_VALUE_REQUIRED),
        }
    }
}

impl<'de> Deserialize<'de> for InitialValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) if s == USER_VALUE_REQUIRED => InitialValue::UserValueRequired,
            other => InitialValue::Literal(other),
        })
    }
}
