use crate::error::FormError;
use crate::path::check_key;
use crate::tree::{FileEntry, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// Key of the wrapper object that carries a file in JSON.
const FILE_KEY: &str = "$file";

/// Convert a value tree to JSON.
///
/// Files are wrapped as `{"$file": {"name": ..., "type": ..., "size": ...}}`
/// so they survive the trip through plain JSON and come back as files.
pub fn to_json_value(value: &Value) -> Json {
    match value {
        Value::Absent => Json::Null,
        Value::String(s) => Json::String(s.clone()),
        Value::File(file) => {
            let mut wrapper = Map::new();
            wrapper.insert(
                FILE_KEY.to_string(),
                serde_json::to_value(file).unwrap_or(Json::Null),
            );
            Json::Object(wrapper)
        }
        Value::Array(items) => Json::Array(items.iter().map(to_json_value).collect()),
        Value::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_json_value(v)))
                .collect(),
        ),
    }
}

/// Convert JSON to a value tree.
///
/// Non-string scalars are serialized the way a form would submit them:
/// numbers become their decimal text, `true` becomes `"on"`, and `false`
/// and `null` become `Absent`. Object keys that no field name can express
/// (empty, or containing `.`, `[`, `]`) fail with `InvalidName`.
pub fn from_json_value(json: &Json) -> Result<Value, FormError> {
    Ok(match json {
        Json::Null | Json::Bool(false) => Value::Absent,
        Json::Bool(true) => Value::String("on".to_string()),
        Json::Number(n) => Value::String(n.to_string()),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(
            items
                .iter()
                .map(from_json_value)
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => {
            if map.len() == 1 {
                if let Some(file) = map.get(FILE_KEY) {
                    if let Ok(file) = FileEntry::deserialize(file) {
                        return Ok(Value::File(file));
                    }
                }
            }
            let mut object = BTreeMap::new();
            for (key, child) in map {
                check_key(key)?;
                object.insert(key.clone(), from_json_value(child)?);
            }
            Value::Object(object)
        }
    })
}

/// Serialize a value tree to compact JSON.
pub fn to_json(value: &Value) -> String {
    to_json_value(value).to_string()
}

/// Parse a JSON document into a value tree.
pub fn from_json(input: &str) -> Result<Value, serde_json::Error> {
    let json: Json = serde_json::from_str(input)?;
    from_json_value(&json).map_err(serde::de::Error::custom)
}

impl TryFrom<Json> for Value {
    type Error = FormError;

    fn try_from(json: Json) -> Result<Self, FormError> {
        from_json_value(&json)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json_value(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        from_json_value(&json).map_err(serde::de::Error::custom)
    }
}
