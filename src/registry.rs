//! Type validation and value-encoding adapters.
//!
//! The reactive core depends on two process-wide (but fully injectable)
//! registries rather than on any concrete encoding or validation scheme:
//!
//! - [`TypeRegistry`] resolves a type tag (`"int"`, `"buffer"`, a
//!   user-registered name, or a `union(...)`/`intersection(...)` of tags)
//!   into a validator predicate.
//! - [`EncoderRegistry`] resolves an encoder descriptor (`"utf8"`,
//!   `"array(utf8)"`, `"string.fixed(10)"`) into an `{encode, decode}` pair.
//!
//! Neither registry knows about the node core; nodes simply hold a type tag
//! and/or an encoding tag string and consult these registries when storing
//! or loading values.

use crate::error::{DagifyError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A type validator: given a value, reports whether it satisfies the tag.
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Registry of named type validators, consulted by nodes carrying a type
/// tag. Built-in tags cover the primitive and numeric-width contract;
/// applications register their own on top.
pub struct TypeRegistry {
    validators: HashMap<String, Validator>,
}

impl TypeRegistry {
    /// Builds a registry pre-populated with the built-in tags: `any`,
    /// `number`, `string`, `boolean`, `object`, `array`, `function`, `int`,
    /// `uint`, `int8`/`16`/`32`/`64`, `uint8`/`16`/`32`/`64`, `float32`/`64`,
    /// `buffer`, `binary`.
    pub fn with_builtins() -> Self {
        let mut reg = Self {
            validators: HashMap::new(),
        };
        reg.register("any", |_| true);
        reg.register("number", |v| v.is_number());
        reg.register("string", |v| v.is_string());
        reg.register("boolean", |v| v.is_boolean());
        reg.register("object", |v| v.is_object());
        reg.register("array", |v| v.is_array());
        // `function` values don't round-trip through serde_json; nodes that
        // tag a dependency leaf as `function` are validating a thunk before
        // normalization, so this always reports false for a materialized
        // JSON value (a callable never survives to this point).
        reg.register("function", |_| false);
        reg.register("int", |v| v.as_i64().is_some());
        reg.register("uint", |v| v.as_u64().is_some());
        for bits in [8, 16, 32, 64] {
            reg.register(format!("int{bits}"), move |v| {
                in_signed_range(v, bits)
            });
            reg.register(format!("uint{bits}"), move |v| {
                in_unsigned_range(v, bits)
            });
        }
        reg.register("float32", |v| v.as_f64().is_some());
        reg.register("float64", |v| v.as_f64().is_some());
        // Buffers/binary are represented as JSON arrays of bytes (0..=255)
        // or base64 strings; either form is accepted.
        reg.register("buffer", is_buffer_like);
        reg.register("binary", is_buffer_like);
        reg
    }

    /// Registers a validator under `name`, overwriting any prior entry.
    pub fn register(&mut self, name: impl Into<String>, validator: impl Fn(&Value) -> bool + Send + Sync + 'static) {
        self.validators.insert(name.into(), Arc::new(validator));
    }

    /// Looks up a validator by exact tag name.
    pub fn get(&self, name: &str) -> Option<Validator> {
        self.validators.get(name).cloned()
    }

    /// Reports whether `name` is registered.
    pub fn has(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Builds the union of several tags: a value is valid if it satisfies
    /// any of them.
    pub fn union(&self, names: &[&str]) -> Result<Validator> {
        let validators: Vec<Validator> = names
            .iter()
            .map(|n| {
                self.get(n)
                    .ok_or_else(|| DagifyError::Registry(format!("unknown type tag: {n}")))
            })
            .collect::<Result<_>>()?;
        Ok(Arc::new(move |v| validators.iter().any(|f| f(v))))
    }

    /// Builds the intersection of several tags: a value is valid only if it
    /// satisfies all of them.
    pub fn intersection(&self, names: &[&str]) -> Result<Validator> {
        let validators: Vec<Validator> = names
            .iter()
            .map(|n| {
                self.get(n)
                    .ok_or_else(|| DagifyError::Registry(format!("unknown type tag: {n}")))
            })
            .collect::<Result<_>>()?;
        Ok(Arc::new(move |v| validators.iter().all(|f| f(v))))
    }

    /// Resolves a type tag that may itself be a `union(a,b)` or
    /// `intersection(a,b)` composite descriptor, falling back to a direct
    /// lookup.
    pub fn resolve(&self, tag: &str) -> Result<Validator> {
        if let Some(inner) = strip_call(tag, "union") {
            let names: Vec<&str> = inner.split(',').map(str::trim).collect();
            return self.union(&names);
        }
        if let Some(inner) = strip_call(tag, "intersection") {
            let names: Vec<&str> = inner.split(',').map(str::trim).collect();
            return self.intersection(&names);
        }
        self.get(tag)
            .ok_or_else(|| DagifyError::Registry(format!("unknown type tag: {tag}")))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn strip_call<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}(");
    s.strip_prefix(prefix.as_str())?.strip_suffix(')')
}

fn in_signed_range(v: &Value, bits: u32) -> bool {
    let Some(n) = v.as_i64() else { return false };
    let max = if bits >= 64 { i64::MAX } else { (1i64 << (bits - 1)) - 1 };
    let min = if bits >= 64 { i64::MIN } else { -(1i64 << (bits - 1)) };
    n >= min && n <= max
}

fn in_unsigned_range(v: &Value, bits: u32) -> bool {
    let Some(n) = v.as_u64() else { return false };
    let max = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    n <= max
}

fn is_buffer_like(v: &Value) -> bool {
    match v {
        Value::Array(items) => items.iter().all(|item| {
            item.as_u64().is_some_and(|n| n <= 255)
        }),
        Value::String(_) => true,
        _ => false,
    }
}

/// An `{encode, decode}` adapter resolved from an encoder descriptor string.
pub struct Encoder {
    /// Encodes a domain value into its byte-buffer JSON representation
    /// (an array of `0..=255` integers).
    pub encode: Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>,
    /// Decodes a byte-buffer JSON representation back into a domain value.
    pub decode: Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>,
}

/// Registry of named encoder descriptors (`"utf8"`, `"array(utf8)"`,
/// `"string.fixed(10)"`) resolved into [`Encoder`] adapters.
///
/// The round-trip law `decode(encode(x)) == x` holds for every descriptor
/// recognized by the registry; see the `encoder_round_trips` property test.
#[derive(Default)]
pub struct EncoderRegistry {
    custom: HashMap<String, Arc<Encoder>>,
}

impl EncoderRegistry {
    /// Creates an empty registry; built-in descriptors (`utf8`,
    /// `array(...)`, `string.fixed(n)`) are always resolvable regardless of
    /// registration, since they're parsed structurally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fully custom encoder under a bare name (no parsing).
    pub fn register(&mut self, name: impl Into<String>, encoder: Encoder) {
        self.custom.insert(name.into(), Arc::new(encoder));
    }

    /// Resolves a descriptor of the form `name`, `name.sub`, or
    /// `name(args...)` into an encoder.
    pub fn resolve(&self, descriptor: &str) -> Result<Arc<Encoder>> {
        if let Some(custom) = self.custom.get(descriptor) {
            return Ok(custom.clone());
        }
        if descriptor == "utf8" {
            return Ok(Arc::new(utf8_encoder()));
        }
        if let Some(inner) = strip_call(descriptor, "array") {
            let elem = self.resolve(inner)?;
            return Ok(Arc::new(array_encoder(elem)));
        }
        if let Some(rest) = descriptor.strip_prefix("string.fixed(") {
            let rest = rest
                .strip_suffix(')')
                .ok_or_else(|| DagifyError::Registry(format!("malformed descriptor: {descriptor}")))?;
            let len: usize = rest
                .parse()
                .map_err(|_| DagifyError::Registry(format!("malformed descriptor: {descriptor}")))?;
            return Ok(Arc::new(fixed_string_encoder(len)));
        }
        Err(DagifyError::Registry(format!(
            "unrecognized encoder descriptor: {descriptor}"
        )))
    }
}

fn bytes_to_value(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

fn value_to_bytes(v: &Value) -> Result<Vec<u8>> {
    v.as_array()
        .ok_or_else(|| DagifyError::EncodingFailure {
            node: String::new(),
            reason: "expected byte buffer (array of u8)".into(),
        })?
        .iter()
        .map(|item| {
            item.as_u64()
                .filter(|n| *n <= 255)
                .map(|n| n as u8)
                .ok_or_else(|| DagifyError::EncodingFailure {
                    node: String::new(),
                    reason: "buffer element out of byte range".into(),
                })
        })
        .collect()
}

fn utf8_encoder() -> Encoder {
    Encoder {
        encode: Arc::new(|v| {
            let s = v.as_str().ok_or_else(|| DagifyError::EncodingFailure {
                node: String::new(),
                reason: "utf8 encoder expects a string".into(),
            })?;
            Ok(bytes_to_value(s.as_bytes()))
        }),
        decode: Arc::new(|v| {
            let bytes = value_to_bytes(v)?;
            let s = String::from_utf8(bytes).map_err(|e| DagifyError::EncodingFailure {
                node: String::new(),
                reason: e.to_string(),
            })?;
            Ok(Value::String(s))
        }),
    }
}

fn array_encoder(elem: Arc<Encoder>) -> Encoder {
    let enc = elem.clone();
    let dec = elem;
    Encoder {
        encode: Arc::new(move |v| {
            let items = v.as_array().ok_or_else(|| DagifyError::EncodingFailure {
                node: String::new(),
                reason: "array encoder expects a JSON array".into(),
            })?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push((enc.encode)(item)?);
            }
            Ok(Value::Array(out))
        }),
        decode: Arc::new(move |v| {
            let items = v.as_array().ok_or_else(|| DagifyError::EncodingFailure {
                node: String::new(),
                reason: "array decoder expects a JSON array".into(),
            })?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push((dec.decode)(item)?);
            }
            Ok(Value::Array(out))
        }),
    }
}

fn fixed_string_encoder(len: usize) -> Encoder {
    Encoder {
        encode: Arc::new(move |v| {
            let s = v.as_str().ok_or_else(|| DagifyError::EncodingFailure {
                node: String::new(),
                reason: "string.fixed encoder expects a string".into(),
            })?;
            let mut bytes = s.as_bytes().to_vec();
            bytes.resize(len, 0);
            Ok(bytes_to_value(&bytes))
        }),
        decode: Arc::new(move |v| {
            let bytes = value_to_bytes(v)?;
            let trimmed: Vec<u8> = bytes.into_iter().take_while(|b| *b != 0).collect();
            let s = String::from_utf8(trimmed).map_err(|e| DagifyError::EncodingFailure {
                node: String::new(),
                reason: e.to_string(),
            })?;
            Ok(Value::String(s))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_int_tags_respect_width() {
        let reg = TypeRegistry::with_builtins();
        let int8 = reg.get("int8").unwrap();
        assert!(int8(&json!(127)));
        assert!(!int8(&json!(128)));
    }

    #[test]
    fn union_and_intersection_compose() {
        let reg = TypeRegistry::with_builtins();
        let v = reg.resolve("union(string,number)").unwrap();
        assert!(v(&json!("x")));
        assert!(v(&json!(1)));
        assert!(!v(&json!(true)));
    }

    #[test]
    fn utf8_encoder_round_trips() {
        let reg = EncoderRegistry::new();
        let enc = reg.resolve("utf8").unwrap();
        let original = json!("hello");
        let encoded = (enc.encode)(&original).unwrap();
        let decoded = (enc.decode)(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn array_of_utf8_round_trips() {
        let reg = EncoderRegistry::new();
        let enc = reg.resolve("array(utf8)").unwrap();
        let original = json!(["a", "bb", "ccc"]);
        let encoded = (enc.encode)(&original).unwrap();
        let decoded = (enc.decode)(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn fixed_string_round_trips_padded() {
        let reg = EncoderRegistry::new();
        let enc = reg.resolve("string.fixed(10)").unwrap();
        let original = json!("abc");
        let encoded = (enc.encode)(&original).unwrap();
        assert_eq!(encoded.as_array().unwrap().len(), 10);
        let decoded = (enc.decode)(&encoded).unwrap();
        assert_eq!(original, decoded);
    }
}
