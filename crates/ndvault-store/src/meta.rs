//! Collection documents and entity metadata.
//!
//! A collection document looks like:
//!
//! ```text
//! {
//!   "metadata_version": "0.2",
//!   "name": "weather",
//!   "type": "array" | "varray",
//!   "schema": {
//!     "dtype": "float64",
//!     "fill_value": "NaN",
//!     "dimensions": [{"name": "x", "size": 10, ...}, ...],
//!     "attributes": [{"name": "city", "dtype": "string", "primary": true}, ...],
//!     "vgrid": [..] | "arrays_shape": [..]          (varray collections)
//!   },
//!   "options": {"chunks": {..}, "compression": {..}}
//! }
//! ```
//!
//! Fields this crate does not interpret are kept so the document
//! round-trips.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ndvault_container::{DType, Scalar, StorageOptions};

use crate::{Result, StoreError};

pub const METADATA_VERSION: &str = "0.2";

/// Attribute name to value
pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Array,
    Varray,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSchema {
    pub name: String,
    pub size: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub name: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub dtype: DType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<Scalar>,
    pub dimensions: Vec<DimensionSchema>,
    #[serde(default)]
    pub attributes: Vec<AttributeSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vgrid: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrays_shape: Option<Vec<usize>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CollectionSchema {
    /// Full shape from the dimension list
    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|d| d.size).collect()
    }

    /// Explicit fill value, else NaN for floats and the type minimum for
    /// integers.
    pub fn fill_value(&self) -> Scalar {
        if let Some(fill) = self.fill_value {
            return fill;
        }
        match self.dtype {
            DType::Float32 | DType::Float64 => Scalar::Float(f64::NAN),
            DType::Int8 => Scalar::Int(i8::MIN as i64),
            DType::Int16 => Scalar::Int(i16::MIN as i64),
            DType::Int32 => Scalar::Int(i32::MIN as i64),
            DType::Int64 => Scalar::Int(i64::MIN),
            DType::UInt8 | DType::UInt16 | DType::UInt32 | DType::UInt64 => Scalar::UInt(0),
        }
    }

    /// Names of primary attributes in schema order
    pub fn primary_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().filter(|a| a.primary).map(|a| a.name.as_str())
    }

    /// Shape of one constituent array of a virtual array
    pub fn split_shape(&self) -> Result<Vec<usize>> {
        let shape = self.shape();
        match (&self.arrays_shape, &self.vgrid) {
            (Some(arrays_shape), _) => {
                if arrays_shape.len() != shape.len()
                    || arrays_shape.iter().zip(&shape).any(|(&a, &s)| a == 0 || s % a != 0)
                {
                    return Err(StoreError::Validation(format!(
                        "arrays_shape {:?} does not evenly split shape {:?}",
                        arrays_shape, shape
                    )));
                }
                Ok(arrays_shape.clone())
            }
            (None, Some(vgrid)) => {
                if vgrid.len() != shape.len() || vgrid.iter().zip(&shape).any(|(&g, &s)| g == 0 || s % g != 0) {
                    return Err(StoreError::Validation(format!(
                        "vgrid {:?} does not evenly split shape {:?}",
                        vgrid, shape
                    )));
                }
                Ok(shape.iter().zip(vgrid).map(|(&s, &g)| s / g).collect())
            }
            (None, None) => Err(StoreError::Validation(
                "virtual array schema needs vgrid or arrays_shape".to_string(),
            )),
        }
    }

    /// Number of constituent arrays along each dimension
    pub fn split_grid(&self) -> Result<Vec<usize>> {
        let arrays_shape = self.split_shape()?;
        Ok(self.shape().iter().zip(&arrays_shape).map(|(&s, &a)| s / a).collect())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(StoreError::Validation("schema has no dimensions".to_string()));
        }
        if let Some(d) = self.dimensions.iter().find(|d| d.size == 0) {
            return Err(StoreError::Validation(format!(
                "dimension {:?} has size 0",
                d.name
            )));
        }
        self.fill_value().encode(self.dtype)?;
        Ok(())
    }
}

/// The collection document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    #[serde(default = "default_metadata_version")]
    pub metadata_version: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionType,
    pub schema: CollectionSchema,
    #[serde(default)]
    pub options: StorageOptions,
}

fn default_metadata_version() -> String {
    METADATA_VERSION.to_string()
}

impl CollectionMeta {
    pub fn new(name: &str, kind: CollectionType, schema: CollectionSchema, options: StorageOptions) -> Self {
        Self {
            metadata_version: default_metadata_version(),
            name: name.to_string(),
            kind,
            schema,
            options,
        }
    }

    /// Shape of one stored array: the full shape, or the split shape for
    /// virtual-array collections
    pub fn array_shape(&self) -> Result<Vec<usize>> {
        match self.kind {
            CollectionType::Array => Ok(self.schema.shape()),
            CollectionType::Varray => self.schema.split_shape(),
        }
    }

    /// Bytes one stored array occupies when fully dense
    pub fn array_footprint(&self) -> Result<u64> {
        let shape = self.array_shape()?;
        let cells = shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
            .and_then(|c| c.checked_mul(self.schema.dtype.size() as u64))
            .unwrap_or(u64::MAX);
        Ok(cells)
    }
}

/// Metadata of one array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub id: String,
    pub collection: String,
    #[serde(default)]
    pub primary_attributes: Attributes,
    #[serde(default)]
    pub custom_attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_position: Option<Vec<usize>>,
}

impl ArrayMeta {
    pub fn new(id: &str, collection: &str) -> Self {
        Self {
            id: id.to_string(),
            collection: collection.to_string(),
            primary_attributes: Attributes::new(),
            custom_attributes: Attributes::new(),
            vid: None,
            v_position: None,
        }
    }

    pub fn with_primary(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.primary_attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn with_custom(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.custom_attributes.insert(name.to_string(), value.into());
        self
    }

    /// Mark this array as the constituent at `position` of virtual array `vid`
    pub fn in_varray(mut self, vid: &str, position: Vec<usize>) -> Self {
        self.vid = Some(vid.to_string());
        self.v_position = Some(position);
        self
    }
}

/// Metadata of one virtual array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VArrayMeta {
    pub id: String,
    pub collection: String,
    #[serde(default)]
    pub primary_attributes: Attributes,
    #[serde(default)]
    pub custom_attributes: Attributes,
    pub vgrid: Vec<usize>,
}

impl VArrayMeta {
    pub fn new(id: &str, collection: &str, vgrid: Vec<usize>) -> Self {
        Self {
            id: id.to_string(),
            collection: collection.to_string(),
            primary_attributes: Attributes::new(),
            custom_attributes: Attributes::new(),
            vgrid,
        }
    }

    pub fn with_primary(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.primary_attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn with_custom(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.custom_attributes.insert(name.to_string(), value.into());
        self
    }
}

/// Primary attribute values ordered by the schema.
///
/// The map must name exactly the schema's primary attributes.
pub fn ordered_primary<'a>(schema: &CollectionSchema, attrs: &'a Attributes) -> Result<Vec<&'a Value>> {
    let names: Vec<&str> = schema.primary_attributes().collect();
    if names.len() != attrs.len() || names.iter().any(|n| !attrs.contains_key(*n)) {
        let mut given: Vec<&str> = attrs.keys().map(String::as_str).collect();
        given.sort_unstable();
        return Err(StoreError::Validation(format!(
            "primary attributes {:?} do not match schema {:?}",
            given, names
        )));
    }
    Ok(names.iter().filter_map(|n| attrs.get(*n)).collect())
}
