use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::{Error, Result, ShDict, ShList};

/// An opaque payload, stored as is in a single slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// A value to store, or a fully read one.
///
/// Maps and lists are stored as separate containers, everything else as a [`Scalar`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Dict(BTreeMap<String, Value>),
    List(Vec<Value>),
}

/// The two shapes of container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Dict,
    List,
}

/// The contents of a value slot.
///
/// References are written as the string `<kind>:<name>`. Consequently a string scalar of that
/// form reads back as a reference; there is no escaping.
#[derive(Clone, Debug, PartialEq)]
pub enum Encoded {
    Scalar(Scalar),
    Ref(Kind, String),
}

/// A read value.
///
/// Nested containers are not read eagerly, they are handles to the sub-container as it was
/// referenced at the time of the read. Use [`Item::into_value`] to read everything.
#[derive(Debug)]
pub enum Item {
    Scalar(Scalar),
    Dict(ShDict),
    List(ShList),
}

impl Kind {
    fn tag(self) -> &'static str {
        match self {
            Kind::Dict => "dict",
            Kind::List => "list",
        }
    }
}

impl Encoded {
    pub fn from_scalar(scalar: Scalar) -> Self {
        if let Scalar::Str(st) = &scalar {
            if let Some((tag, name)) = st.split_once(':') {
                let kind = match tag {
                    "dict" => Some(Kind::Dict),
                    "list" => Some(Kind::List),
                    _ => None,
                };

                if let Some(kind) = kind {
                    return Encoded::Ref(kind, name.to_owned());
                }
            }
        }

        Encoded::Scalar(scalar)
    }

    pub fn into_scalar(self) -> Scalar {
        match self {
            Encoded::Scalar(scalar) => scalar,
            Encoded::Ref(kind, name) => Scalar::Str(format!("{}:{name}", kind.tag())),
        }
    }
}

impl Item {
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Item::Scalar(_) => None,
            Item::Dict(_) => Some(Kind::Dict),
            Item::List(_) => Some(Kind::List),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Item::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn into_dict(self) -> Result<ShDict> {
        match self {
            Item::Dict(dict) => Ok(dict),
            other => Err(other.kind_error(Kind::Dict)),
        }
    }

    pub fn into_list(self) -> Result<ShList> {
        match self {
            Item::List(list) => Ok(list),
            other => Err(other.kind_error(Kind::List)),
        }
    }

    /// Read the item and everything it refers to.
    ///
    /// Fails with [`Error::Cycle`] if a container is reachable from itself. Containers written
    /// through this crate never are, as sub-containers always get fresh names.
    pub fn into_value(self) -> Result<Value> {
        self.materialize(&mut HashSet::new())
    }

    pub(crate) fn materialize(self, path: &mut HashSet<String>) -> Result<Value> {
        match self {
            Item::Scalar(scalar) => Ok(Value::Scalar(scalar)),
            Item::Dict(mut dict) => dict.collect_map(path).map(Value::Dict),
            Item::List(mut list) => list.collect_values(path).map(Value::List),
        }
    }

    fn kind_error(&self, expected: Kind) -> Error {
        let name = match self {
            Item::Scalar(scalar) => format!("{}", Value::Scalar(scalar.clone())),
            Item::Dict(dict) => dict.name().to_owned(),
            Item::List(list) => list.name().to_owned(),
        };

        Error::Kind { name, expected }
    }
}

impl Value {
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn dict<K: Into<String>, V: Into<Value>>(items: impl IntoIterator<Item = (K, V)>) -> Self {
        Value::Dict(
            items
                .into_iter()
                .map(|(key, val)| (key.into(), val.into()))
                .collect(),
        )
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A JSON-like rendering, byte strings are written as a list of numbers.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(Scalar::None) => f.write_str("null"),
            Value::Scalar(Scalar::Bool(b)) => write!(f, "{b}"),
            Value::Scalar(Scalar::Int(i)) => write!(f, "{i}"),
            Value::Scalar(Scalar::Float(x)) => write!(f, "{x:?}"),
            Value::Scalar(Scalar::Str(st)) => write!(f, "{st:?}"),
            Value::Scalar(Scalar::Bytes(bytes)) => write!(f, "{bytes:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict(map) => {
                f.write_str("{")?;
                for (idx, (key, item)) in map.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Scalar(Scalar::Int(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Scalar(Scalar::Int(i.into()))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(Scalar::Float(x))
    }
}

impl From<&str> for Value {
    fn from(st: &str) -> Self {
        Value::Scalar(Scalar::Str(st.to_owned()))
    }
}

impl From<String> for Value {
    fn from(st: String) -> Self {
        Value::Scalar(Scalar::Str(st))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(val: Option<T>) -> Self {
        val.map_or(Value::Scalar(Scalar::None), Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Dict(map)
    }
}
