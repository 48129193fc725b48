//! Data types carried by operator ports. Pure data; no runtime values.
//!
//! A port's `DataType` is a named record model. Planning only cares about
//! identity (for boundary equivalence) and the field list (for size guesses).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    Date64,
    Decimal128,
}

impl FieldType {
    /// Average encoded width used by size estimation.
    pub fn width_hint(self) -> u64 {
        match self {
            FieldType::Boolean => 1,
            FieldType::Int32 | FieldType::Float32 => 4,
            FieldType::Int64 | FieldType::Float64 | FieldType::Date64 => 8,
            FieldType::Decimal128 => 16,
            FieldType::Utf8 => 32,
            FieldType::Binary => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

/// Record type flowing through a port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl DataType {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Estimated bytes per record; at least one.
    pub fn record_width_hint(&self) -> u64 {
        self.fields
            .iter()
            .map(|f| f.field_type.width_hint())
            .sum::<u64>()
            .max(1)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// Grouping requirement of an input port: partition keys plus in-group order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Group {
    pub keys: Vec<String>,
    #[serde(default)]
    pub ordering: Vec<SortKey>,
}

impl Group {
    pub fn by<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ordering: Vec::new(),
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.ordering.push(SortKey {
            field: field.into(),
            ascending,
        });
        self
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "={}", self.keys.join(","))?;
        for key in &self.ordering {
            write!(f, " {}{}", if key.ascending { "+" } else { "-" }, key.field)?;
        }
        Ok(())
    }
}
