//! A minimal Avro record-schema model: just enough of the Avro JSON schema
//! language to describe the flat, single-level records this converter emits
//! (see [`crate::instance::table_meta_cache`] for how a `TableCreate` is
//! turned into one of these).

use crate::error::ConverterError;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvroType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Enum { name: String, symbols: Vec<String> },
    /// `["null", T]` union, i.e. a nullable `T`.
    NullableUnion(Box<AvroType>),
}

impl AvroType {
    fn type_json(&self) -> Value {
        match self {
            AvroType::Null => json!("null"),
            AvroType::Boolean => json!("boolean"),
            AvroType::Int => json!("int"),
            AvroType::Long => json!("long"),
            AvroType::Float => json!("float"),
            AvroType::Double => json!("double"),
            AvroType::String => json!("string"),
            AvroType::Bytes => json!("bytes"),
            AvroType::Enum { name, symbols } => json!({
                "type": "enum",
                "name": name,
                "symbols": symbols,
            }),
            AvroType::NullableUnion(inner) => json!(["null", inner.type_json()]),
        }
    }

    fn from_json(v: &Value) -> Result<AvroType, ConverterError> {
        match v {
            Value::String(s) => match s.as_str() {
                "null" => Ok(AvroType::Null),
                "boolean" => Ok(AvroType::Boolean),
                "int" => Ok(AvroType::Int),
                "long" => Ok(AvroType::Long),
                "float" => Ok(AvroType::Float),
                "double" => Ok(AvroType::Double),
                "string" => Ok(AvroType::String),
                "bytes" => Ok(AvroType::Bytes),
                other => Err(ConverterError::Schema(format!("unknown avro type {other}"))),
            },
            Value::Array(variants) => {
                if variants.len() == 2 && variants[0] == json!("null") {
                    Ok(AvroType::NullableUnion(Box::new(AvroType::from_json(
                        &variants[1],
                    )?)))
                } else {
                    Err(ConverterError::Schema(
                        "only [\"null\", T] unions are supported".into(),
                    ))
                }
            }
            Value::Object(map) if map.get("type") == Some(&json!("enum")) => {
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConverterError::Schema("enum missing name".into()))?
                    .to_string();
                let symbols = map
                    .get("symbols")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ConverterError::Schema("enum missing symbols".into()))?
                    .iter()
                    .map(|s| s.as_str().unwrap_or_default().to_string())
                    .collect();
                Ok(AvroType::Enum { name, symbols })
            }
            other => Err(ConverterError::Schema(format!(
                "unsupported schema type shape: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: AvroType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    pub fn to_json_string(&self) -> String {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "type": f.field_type.type_json(),
                })
            })
            .collect();
        let schema = json!({
            "type": "record",
            "name": self.name,
            "fields": fields,
        });
        serde_json::to_string(&schema).expect("schema json never fails to serialize")
    }

    pub fn from_json_str(text: &str) -> Result<RecordSchema, ConverterError> {
        let v: Value = serde_json::from_str(text)
            .map_err(|e| ConverterError::Schema(format!("invalid schema json: {e}")))?;
        let name = v
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ConverterError::Schema("schema missing name".into()))?
            .to_string();
        let fields_json = v
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| ConverterError::Schema("schema missing fields".into()))?;
        let mut fields = Vec::with_capacity(fields_json.len());
        for f in fields_json {
            let fname = f
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ConverterError::Schema("field missing name".into()))?
                .to_string();
            let ftype = AvroType::from_json(
                f.get("type")
                    .ok_or_else(|| ConverterError::Schema("field missing type".into()))?,
            )?;
            fields.push(FieldSchema {
                name: fname,
                field_type: ftype,
            });
        }
        Ok(RecordSchema { name, fields })
    }
}
