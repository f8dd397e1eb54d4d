//! Multi-document YAML parsing into serde_json values
//!
//! Manifests are parsed with yaml-rust2 and converted to `serde_json::Value`
//! so they can be handed to kube's dynamic API unchanged.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Parse every non-empty document of a `---` separated YAML stream.
///
/// Empty documents (a trailing `---`, comment-only sections) are skipped.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, Error> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::manifest(format!("invalid YAML: {}", e)))?;

    let mut values = Vec::with_capacity(docs.len());
    for doc in docs {
        match to_json(doc)? {
            Value::Null => continue,
            value => values.push(value),
        }
    }
    Ok(values)
}

fn to_json(yaml: Yaml) -> Result<Value, Error> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(raw) => {
            let f: f64 = raw
                .parse()
                .map_err(|_| Error::manifest(format!("invalid float: {}", raw)))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Hash(hash) => {
            let mut map = Map::with_capacity(hash.len());
            for (key, value) in hash {
                let key = match key {
                    Yaml::String(s) | Yaml::Real(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Boolean(b) => b.to_string(),
                    other => {
                        return Err(Error::manifest(format!(
                            "unsupported YAML key: {:?}",
                            other
                        )))
                    }
                };
                map.insert(key, to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(Error::manifest("YAML aliases are not supported")),
        Yaml::BadValue => return Err(Error::manifest("bad YAML value")),
    })
}
