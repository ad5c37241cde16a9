//! Accessors for schemaless resource documents.
//!
//! Vendor resources are handled as [`serde_json::Value`] trees rather than
//! generated types. Every accessor reports *where* a lookup failed and
//! distinguishes a missing field from a field of the wrong type, so that an
//! absent weight is never mistaken for a weight of zero.

use serde_json::{Map, Value};
use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("{path} not found")]
    NotFound { path: Path },

    #[error("{path} is {found}, expected {expected}")]
    WrongType {
        path: Path,
        expected: &'static str,
        found: &'static str,
    },
}

/// A location in a resource document, e.g. `spec.routes[1].httpRoute`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<Segment>);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
}

// === impl Error ===

impl Error {
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path } | Self::WrongType { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Re-roots an error raised on a sub-document so that it names the full
    /// path from the top of the resource.
    pub fn within(self, prefix: &Path) -> Self {
        match self {
            Self::NotFound { path } => Self::NotFound {
                path: prefix.join(&path),
            },
            Self::WrongType {
                path,
                expected,
                found,
            } => Self::WrongType {
                path: prefix.join(&path),
                expected,
                found,
            },
        }
    }
}

// === impl Path ===

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Field(name.into()));
        Self(segments)
    }

    pub fn index(&self, idx: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(idx));
        Self(segments)
    }

    pub fn join(&self, other: &Path) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    fn prefix(&self, len: usize) -> Self {
        Self(self.0[..len].to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Path {
    fn from(fields: [&str; N]) -> Self {
        Self(
            fields
                .iter()
                .map(|f| Segment::Field(f.to_string()))
                .collect(),
        )
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Field(name) if i == 0 => f.write_str(name)?,
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

// === accessors ===

/// Returns the value at `path`.
pub fn get(doc: &Value, path: impl Into<Path>) -> Result<&Value> {
    let path = path.into();
    let mut cur = doc;
    for (depth, segment) in path.0.iter().enumerate() {
        cur = step(cur, segment).map_err(|found| match found {
            None => Error::NotFound {
                path: path.prefix(depth + 1),
            },
            Some(found) => Error::WrongType {
                path: path.prefix(depth),
                expected: expected_container(segment),
                found,
            },
        })?;
    }
    Ok(cur)
}

/// Returns a mutable reference to the value at `path`.
pub fn get_mut(doc: &mut Value, path: impl Into<Path>) -> Result<&mut Value> {
    let path = path.into();
    let mut cur = doc;
    for (depth, segment) in path.0.iter().enumerate() {
        let found = type_name(cur);
        let next = match (segment, cur) {
            (Segment::Field(name), Value::Object(map)) => map.get_mut(name).ok_or(None),
            (Segment::Index(idx), Value::Array(items)) => items.get_mut(*idx).ok_or(None),
            _ => Err(Some(found)),
        };
        cur = next.map_err(|found| match found {
            None => Error::NotFound {
                path: path.prefix(depth + 1),
            },
            Some(found) => Error::WrongType {
                path: path.prefix(depth),
                expected: expected_container(segment),
                found,
            },
        })?;
    }
    Ok(cur)
}

pub fn string(doc: &Value, path: impl Into<Path>) -> Result<&str> {
    let path = path.into();
    let value = get(doc, &path)?;
    value.as_str().ok_or_else(|| wrong_type(path, "string", value))
}

/// Like [`string`], but a missing field yields `None` rather than an error.
pub fn opt_string(doc: &Value, path: impl Into<Path>) -> Result<Option<&str>> {
    match string(doc, path) {
        Ok(s) => Ok(Some(s)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

pub fn int64(doc: &Value, path: impl Into<Path>) -> Result<i64> {
    let path = path.into();
    let value = get(doc, &path)?;
    as_int64(value).ok_or_else(|| wrong_type(path, "int64", value))
}

pub fn map(doc: &Value, path: impl Into<Path>) -> Result<&Map<String, Value>> {
    let path = path.into();
    let value = get(doc, &path)?;
    value.as_object().ok_or_else(|| wrong_type(path, "map", value))
}

pub fn list(doc: &Value, path: impl Into<Path>) -> Result<&Vec<Value>> {
    let path = path.into();
    let value = get(doc, &path)?;
    value.as_array().ok_or_else(|| wrong_type(path, "list", value))
}

pub fn list_mut(doc: &mut Value, path: impl Into<Path>) -> Result<&mut Vec<Value>> {
    let path = path.into();
    let value = get_mut(doc, &path)?;
    let found = type_name(value);
    value.as_array_mut().ok_or(Error::WrongType {
        path,
        expected: "list",
        found,
    })
}

/// Returns the list at `path`, requiring every item to be a map.
pub fn list_of_maps(doc: &Value, path: impl Into<Path>) -> Result<Vec<&Map<String, Value>>> {
    let path = path.into();
    list(doc, &path)?
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            item.as_object()
                .ok_or_else(|| wrong_type(path.index(idx), "map", item))
        })
        .collect()
}

/// Sets the value at `path`, creating intermediate maps as needed.
///
/// List indexes must already exist.
pub fn set(doc: &mut Value, path: impl Into<Path>, value: Value) -> Result<()> {
    let path = path.into();
    let Some((last, parents)) = path.0.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut cur = doc;
    for (depth, segment) in parents.iter().enumerate() {
        cur = match segment {
            Segment::Field(name) => {
                if cur.is_null() {
                    *cur = Value::Object(Map::new());
                }
                let found = type_name(cur);
                let map = cur.as_object_mut().ok_or(Error::WrongType {
                    path: path.prefix(depth),
                    expected: "map",
                    found,
                })?;
                map.entry(name.clone())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
            Segment::Index(idx) => {
                let found = type_name(cur);
                let items = cur.as_array_mut().ok_or(Error::WrongType {
                    path: path.prefix(depth),
                    expected: "list",
                    found,
                })?;
                items.get_mut(*idx).ok_or(Error::NotFound {
                    path: path.prefix(depth + 1),
                })?
            }
        };
    }

    let depth = parents.len();
    match last {
        Segment::Field(name) => {
            if cur.is_null() {
                *cur = Value::Object(Map::new());
            }
            let found = type_name(cur);
            let map = cur.as_object_mut().ok_or(Error::WrongType {
                path: path.prefix(depth),
                expected: "map",
                found,
            })?;
            map.insert(name.clone(), value);
        }
        Segment::Index(idx) => {
            let found = type_name(cur);
            let items = cur.as_array_mut().ok_or(Error::WrongType {
                path: path.prefix(depth),
                expected: "list",
                found,
            })?;
            let slot = items.get_mut(*idx).ok_or(Error::NotFound {
                path: path.clone(),
            })?;
            *slot = value;
        }
    }
    Ok(())
}

/// Removes the field at `path`, returning its previous value. A missing field
/// is not an error.
pub fn remove(doc: &mut Value, path: impl Into<Path>) -> Result<Option<Value>> {
    let path = path.into();
    let Some((Segment::Field(name), parents)) = path.0.split_last() else {
        return Ok(None);
    };
    match get_mut(doc, Path(parents.to_vec())) {
        Ok(Value::Object(map)) => Ok(map.remove(name)),
        Ok(other) => Err(Error::WrongType {
            path: Path(parents.to_vec()),
            expected: "map",
            found: type_name(other),
        }),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// Reads an integer that may have been encoded as a whole float.
pub fn as_int64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn step<'v>(cur: &'v Value, segment: &Segment) -> Result<&'v Value, Option<&'static str>> {
    match (segment, cur) {
        (Segment::Field(name), Value::Object(map)) => map.get(name).ok_or(None),
        (Segment::Index(idx), Value::Array(items)) => items.get(*idx).ok_or(None),
        (_, other) => Err(Some(type_name(other))),
    }
}

fn expected_container(segment: &Segment) -> &'static str {
    match segment {
        Segment::Field(_) => "map",
        Segment::Index(_) => "list",
    }
}

fn wrong_type(path: Path, expected: &'static str, value: &Value) -> Error {
    Error::WrongType {
        path,
        expected,
        found: type_name(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> Value {
        json!({
            "spec": {
                "routes": [
                    {"name": "primary", "httpRoute": {"action": {"weightedTargets": [
                        {"virtualNodeRef": {"name": "stable"}, "weight": 100},
                    ]}}},
                    "not-a-map",
                ],
            },
        })
    }

    #[test]
    fn path_display() {
        let path = Path::from(["spec", "routes"]).index(2).field("name");
        assert_eq!(path.to_string(), "spec.routes[2].name");
        assert_eq!(Path::root().to_string(), "<root>");
    }

    #[test]
    fn typed_getters() {
        let doc = router();
        let path = Path::from(["spec", "routes"]).index(0);
        assert_eq!(string(&doc, path.field("name")).unwrap(), "primary");

        let weight = path
            .field("httpRoute")
            .field("action")
            .field("weightedTargets")
            .index(0)
            .field("weight");
        assert_eq!(int64(&doc, weight).unwrap(), 100);
    }

    #[test]
    fn missing_field_is_not_zero() {
        let doc = json!({"spec": {"weight": null}});
        let err = int64(&doc, ["spec", "weighted"]).unwrap_err();
        assert_eq!(
            err,
            Error::NotFound {
                path: Path::from(["spec", "weighted"])
            }
        );

        let err = int64(&doc, ["spec", "weight"]).unwrap_err();
        assert!(matches!(err, Error::WrongType { found: "null", .. }));
    }

    #[test]
    fn wrong_intermediate_type() {
        let doc = json!({"spec": "oops"});
        let err = string(&doc, ["spec", "service"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "spec is string, expected map",
            "the error names the container, not the leaf"
        );
    }

    #[test]
    fn list_of_maps_rejects_scalars() {
        let doc = router();
        let err = list_of_maps(&doc, ["spec", "routes"]).unwrap_err();
        assert_eq!(err.path().to_string(), "spec.routes[1]");
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut doc = json!({"spec": {}});
        set(&mut doc, ["spec", "podSelector", "matchLabels"], json!({"a": "b"})).unwrap();
        assert_eq!(doc, json!({"spec": {"podSelector": {"matchLabels": {"a": "b"}}}}));

        set(&mut doc, ["spec", "weight"], json!(10)).unwrap();
        assert_eq!(int64(&doc, ["spec", "weight"]).unwrap(), 10);
    }

    #[test]
    fn set_through_list() {
        let mut doc = router();
        let path = Path::from(["spec", "routes"]).index(0).field("name");
        set(&mut doc, &path, json!("renamed")).unwrap();
        assert_eq!(string(&doc, &path).unwrap(), "renamed");

        let missing = Path::from(["spec", "routes"]).index(7).field("name");
        assert!(set(&mut doc, missing, json!("x")).unwrap_err().is_not_found());
    }

    #[test]
    fn remove_is_lenient() {
        let mut doc = json!({"spec": {"weight": 5}});
        assert_eq!(remove(&mut doc, ["spec", "weight"]).unwrap(), Some(json!(5)));
        assert_eq!(remove(&mut doc, ["spec", "weight"]).unwrap(), None);
        assert_eq!(remove(&mut doc, ["status", "x"]).unwrap(), None);
    }

    #[test]
    fn errors_rerooted_within_prefix() {
        let route = json!({"httpRoute": {}});
        let err = list(&route, ["httpRoute", "action"]).unwrap_err();
        let prefix = Path::from(["spec", "routes"]).index(3);
        assert_eq!(
            err.within(&prefix).to_string(),
            "spec.routes[3].httpRoute.action not found"
        );
    }

    #[test]
    fn whole_floats_are_integers() {
        assert_eq!(as_int64(&json!(40.0)), Some(40));
        assert_eq!(as_int64(&json!(40.5)), None);
        assert_eq!(as_int64(&json!("40")), None);
    }
}
