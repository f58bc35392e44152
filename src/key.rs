//! Node identity: 32-byte opaque keys and pluggable key generation.

use crate::error::{DagifyError, Result};
use std::fmt;

/// A node's canonical identity: exactly 32 bytes, immutable once set.
///
/// String forms (as produced by [`NodeKey::encoded`]) are lazily-derived
/// hex views used by the graph container when a caller prefers to address
/// nodes by string rather than by raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey([u8; 32]);

impl NodeKey {
    /// Builds a key from exactly 32 bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a byte slice, failing with [`DagifyError::KeyShape`]
    /// if the length isn't exactly 32.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(DagifyError::KeyShape(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Parses a key from its hex-encoded string form.
    pub fn from_encoded(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(DagifyError::InvalidReference(format!(
                "encoded key has wrong length: {s}"
            )));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in out.iter_mut().enumerate() {
            let byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DagifyError::InvalidReference(format!("malformed key: {s}")))?;
            *chunk = byte;
        }
        Ok(Self(out))
    }

    /// Raw 32 bytes.
    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lazily-derived lowercase hex string view of this key.
    ///
    /// Used as the hashable identity proxy during cycle detection and as
    /// the keyed-dependency-map entry name.
    pub fn encoded(&self) -> String {
        let mut s = String::with_capacity(64);
        for byte in &self.0 {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self.encoded())
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoded())
    }
}

/// Pluggable source of fresh node keys.
///
/// Implementations carry no cryptographic assumptions beyond returning 32
/// bytes; the default uses [`rand`]. Swap in a deterministic generator for
/// tests or a scoped execution window.
pub trait KeyGenerator: Send + Sync {
    /// Returns a fresh 32-byte key.
    fn generate(&self) -> NodeKey;
}

/// Default key generator backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> NodeKey {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        NodeKey(bytes)
    }
}
