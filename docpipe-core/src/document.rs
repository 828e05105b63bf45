// src/document.rs
use crate::value::Value;

/// One semi-structured record: an insertion-ordered field map.
///
/// Field order is preserved because stages (notably `$project`) emit
/// fields in declared order and results are rendered in that order.
/// Documents are small, so linear name lookup beats hashing here.
///
/// Stages never mutate their inputs; every stage builds new documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    /// Insert a field, replacing an existing one of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    /// Resolve a dot-separated field path.
    ///
    /// A missing field or missing intermediate yields `None` (the absent
    /// outcome), never an error. Numeric segments index into arrays.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut value = self.field(first)?;
        for segment in segments {
            match value {
                Value::Document(doc) => value = doc.field(segment)?,
                Value::Array(arr) => {
                    let index: usize = segment.parse().ok()?;
                    value = arr.get(index)?;
                }
                _ => return None,
            }
        }
        Some(value)
    }

    /// Set a value at a dot-separated path, creating intermediate
    /// documents as needed. Used by `$unwind` to put the single element
    /// back where the array was.
    ///
    /// Numeric segments index into arrays, mirroring `get`; a
    /// non-numeric or out-of-bounds index on an array leaves the
    /// document unchanged.
    pub fn set_path(&mut self, path: &str, value: Value) {
        match path.split_once('.') {
            None => self.insert(path, value),
            Some((head, rest)) => {
                if let Some(Value::Document(inner)) = self.field_mut(head) {
                    inner.set_path(rest, value);
                    return;
                }
                if let Some(Value::Array(items)) = self.field_mut(head) {
                    set_in_array(items, rest, value);
                    return;
                }
                let mut inner = Document::new();
                inner.set_path(rest, value);
                self.insert(head, Value::Document(inner));
            }
        }
    }

    /// Top-level field access by exact name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Whether a top-level field exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter().map(|(n, v)| (n, v))
    }

    /// Render as a `serde_json::Value` object, preserving field order
    /// via the order of a `serde_json::Map` built field by field.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Resolve one index segment of a `set_path` call inside an array.
/// Invalid or out-of-bounds indices drop the write.
fn set_in_array(items: &mut [Value], path: &str, value: Value) {
    let (segment, rest) = match path.split_once('.') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (path, None),
    };
    let Ok(index) = segment.parse::<usize>() else {
        return;
    };
    let Some(slot) = items.get_mut(index) else {
        return;
    };
    match (slot, rest) {
        (slot, None) => *slot = value,
        (Value::Document(inner), Some(rest)) => inner.set_path(rest, value),
        (Value::Array(inner), Some(rest)) => set_in_array(inner, rest, value),
        (slot, Some(rest)) => {
            let mut inner = Document::new();
            inner.set_path(rest, value);
            *slot = Value::Document(inner);
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (name, value) in iter {
            doc.insert(name, value);
        }
        doc
    }
}

/// Build a [`Document`] from literal field/value pairs:
///
/// ```
/// use docpipe_core::doc;
/// let d = doc! { "name" => "Alice", "age" => 30i64 };
/// assert_eq!(d.len(), 2);
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::document::Document::new() };
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {{
        let mut d = $crate::document::Document::new();
        $( d.insert($name, $crate::value::Value::from($value)); )+
        d
    }};
}
