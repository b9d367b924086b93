use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_yaml::value::{Tag, TaggedValue};

use crate::error::{CiGraphError, Result};

const REFERENCE_TAG: &str = "reference";

/// A YAML node of a GitLab CI configuration.
///
/// Scalars keep their YAML type so a resolved configuration serializes back the
/// way it was written. `!reference [job, key, ...]` tags are kept as
/// `Reference` until they are resolved against the merged document, so callers
/// can tell an unresolved reference apart from a plain list.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
    Sequence(Vec<Value>),
    Mapping(IndexMap<String, Value>),
    Reference(Vec<String>),
}

pub type Mapping = IndexMap<String, Value>;

impl Value {
    /// Converts a parsed `serde_yaml` document into a `Value`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for mapping keys that are not scalars and for
    /// `!reference` tags whose payload is not a list of scalars.
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self> {
        Ok(match value {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Bool(b),
            serde_yaml::Value::Number(n) => Self::Number(n),
            serde_yaml::Value::String(s) => Self::String(s),
            serde_yaml::Value::Sequence(items) => Self::Sequence(
                items
                    .into_iter()
                    .map(Self::from_yaml)
                    .collect::<Result<_>>()?,
            ),
            serde_yaml::Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    let key = scalar_to_string(&key).ok_or_else(|| {
                        CiGraphError::InvalidConfig(format!("non-scalar mapping key: {key:?}"))
                    })?;
                    out.insert(key, Self::from_yaml(value)?);
                }
                Self::Mapping(out)
            }
            serde_yaml::Value::Tagged(tagged) => {
                if tagged.tag == REFERENCE_TAG {
                    Self::Reference(reference_path(tagged.value)?)
                } else {
                    log::debug!("Ignoring unknown YAML tag {}", tagged.tag);
                    Self::from_yaml(tagged.value)?
                }
            }
        })
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Self::Null => serde_yaml::Value::Null,
            Self::Bool(b) => serde_yaml::Value::Bool(*b),
            Self::Number(n) => serde_yaml::Value::Number(n.clone()),
            Self::String(s) => serde_yaml::Value::String(s.clone()),
            Self::Sequence(items) => {
                serde_yaml::Value::Sequence(items.iter().map(Self::to_yaml).collect())
            }
            Self::Mapping(map) => serde_yaml::Value::Mapping(
                map.iter()
                    .map(|(k, v)| (serde_yaml::Value::String(k.clone()), v.to_yaml()))
                    .collect(),
            ),
            Self::Reference(path) => serde_yaml::Value::Tagged(Box::new(TaggedValue {
                tag: Tag::new(REFERENCE_TAG),
                value: serde_yaml::Value::Sequence(
                    path.iter()
                        .map(|p| serde_yaml::Value::String(p.clone()))
                        .collect(),
                ),
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_mapping().and_then(|map| map.get(key))
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Renders strings, numbers and booleans as text; `None` for anything else.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_yaml().serialize(serializer)
    }
}

/// Deep-merges `overlay` into `base`. Mappings merge key by key with the
/// overlay winning; any other value is replaced wholesale.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn reference_path(value: serde_yaml::Value) -> Result<Vec<String>> {
    let serde_yaml::Value::Sequence(items) = value else {
        return Err(CiGraphError::InvalidConfig(
            "!reference expects a list of keys".to_string(),
        ));
    };

    items
        .iter()
        .map(|item| {
            scalar_to_string(item).ok_or_else(|| {
                CiGraphError::InvalidConfig(format!("!reference key must be a scalar: {item:?}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Value {
        Value::from_yaml(serde_yaml::from_str(source).unwrap()).unwrap()
    }

    #[test]
    fn test_reference_tag_is_kept_as_reference() {
        let value = parse("script: !reference [.setup, script]");

        let script = value.get("script").unwrap();
        assert_eq!(
            script,
            &Value::Reference(vec![".setup".to_string(), "script".to_string()])
        );
    }

    #[test]
    fn test_reference_round_trips_as_tagged_sequence() {
        let value = parse("script: !reference [.setup, script]");

        let rendered = serde_yaml::to_string(&value).unwrap();

        assert!(rendered.contains("!reference"));
        assert_eq!(parse(&rendered), value);
    }

    #[test]
    fn test_mapping_preserves_key_order() {
        let value = parse("zeta: 1\nalpha: 2\nmid: 3\n");

        let keys: Vec<&str> = value
            .as_mapping()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_numeric_keys_become_strings() {
        let value = parse("1: one\n");
        assert_eq!(value.get("1").and_then(Value::as_str), Some("one"));
    }

    #[test]
    fn test_invalid_reference_payload() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("a: !reference job").unwrap();
        assert!(Value::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(parse("3").scalar_text(), Some("3".to_string()));
        assert_eq!(parse("true").scalar_text(), Some("true".to_string()));
        assert_eq!(parse("[a]").scalar_text(), None);
    }

    mod deep_merge_tests {
        use super::*;

        #[test]
        fn test_nested_mappings_merge_and_overlay_wins() {
            let mut base = parse("variables: {A: 1, B: 2}\nimage: alpine\n");
            let overlay = parse("variables: {B: 3, C: 4}\n");

            deep_merge(&mut base, overlay);

            assert_eq!(base, parse("variables: {A: 1, B: 3, C: 4}\nimage: alpine\n"));
        }

        #[test]
        fn test_sequences_are_replaced() {
            let mut base = parse("script: [a, b]");
            deep_merge(&mut base, parse("script: [c]"));
            assert_eq!(base, parse("script: [c]"));
        }
    }
}
