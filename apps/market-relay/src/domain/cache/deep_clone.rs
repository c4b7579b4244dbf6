//! Deep Copy Capability
//!
//! Values stored in a [`BoundedCache`](super::BoundedCache) must be able to
//! produce a structurally independent copy of themselves. Handing out such a
//! copy on every read (and taking one on every write) keeps callers from
//! mutating what the cache holds.
//!
//! Shared-ownership handles such as `Arc` and `Rc` deliberately do not
//! implement [`DeepClone`]: a clone of one still aliases the original.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;

// =============================================================================
// Error Type
// =============================================================================

/// A value could not produce an independent copy of itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloneError {
    /// Serializing the value failed.
    #[error("value could not be serialized: {0}")]
    Serialize(String),

    /// The serialized form could not be read back.
    #[error("value could not be deserialized: {0}")]
    Deserialize(String),

    /// The copy is not equivalent to the original.
    #[error("value did not survive copying: {0}")]
    Lossy(String),
}

// =============================================================================
// DeepClone
// =============================================================================

/// Produces a copy that shares no mutable state with `self`.
pub trait DeepClone: Sized {
    /// Create an independent copy.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError`] if the value cannot be copied faithfully.
    fn deep_clone(&self) -> Result<Self, CloneError>;
}

/// Implements [`DeepClone`] through [`Clone`] for types that own all of
/// their data.
#[macro_export]
macro_rules! deep_clone_via_clone {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::domain::cache::DeepClone for $ty {
                fn deep_clone(&self) -> Result<Self, $crate::domain::cache::CloneError> {
                    Ok(::std::clone::Clone::clone(self))
                }
            }
        )+
    };
}

deep_clone_via_clone!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, Decimal, DateTime<Utc>
);

impl<T: DeepClone> DeepClone for Option<T> {
    fn deep_clone(&self) -> Result<Self, CloneError> {
        self.as_ref().map(DeepClone::deep_clone).transpose()
    }
}

impl<T: DeepClone> DeepClone for Vec<T> {
    fn deep_clone(&self) -> Result<Self, CloneError> {
        self.iter().map(DeepClone::deep_clone).collect()
    }
}

impl<T: DeepClone> DeepClone for Box<T> {
    fn deep_clone(&self) -> Result<Self, CloneError> {
        Ok(Self::new((**self).deep_clone()?))
    }
}

impl<K, V, S> DeepClone for HashMap<K, V, S>
where
    K: DeepClone + Eq + Hash,
    V: DeepClone,
    S: BuildHasher + Default,
{
    fn deep_clone(&self) -> Result<Self, CloneError> {
        self.iter()
            .map(|(k, v)| Ok((k.deep_clone()?, v.deep_clone()?)))
            .collect()
    }
}

impl<K: DeepClone + Ord, V: DeepClone> DeepClone for BTreeMap<K, V> {
    fn deep_clone(&self) -> Result<Self, CloneError> {
        self.iter()
            .map(|(k, v)| Ok((k.deep_clone()?, v.deep_clone()?)))
            .collect()
    }
}

impl<A: DeepClone, B: DeepClone> DeepClone for (A, B) {
    fn deep_clone(&self) -> Result<Self, CloneError> {
        Ok((self.0.deep_clone()?, self.1.deep_clone()?))
    }
}

impl<A: DeepClone, B: DeepClone, C: DeepClone> DeepClone for (A, B, C) {
    fn deep_clone(&self) -> Result<Self, CloneError> {
        Ok((self.0.deep_clone()?, self.1.deep_clone()?, self.2.deep_clone()?))
    }
}

// =============================================================================
// JSON Snapshot
// =============================================================================

/// Wrapper that copies a serde value by round-tripping it through JSON.
///
/// Useful for types that only derive serde traits. The round trip must
/// reproduce an equal value; anything JSON cannot represent faithfully
/// (for example a NaN float, which serializes as `null`) is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JsonSnapshot<T>(pub T);

impl<T> JsonSnapshot<T> {
    /// Unwrap the inner value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> DeepClone for JsonSnapshot<T>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    fn deep_clone(&self) -> Result<Self, CloneError> {
        let json = serde_json::to_vec(&self.0).map_err(|e| CloneError::Serialize(e.to_string()))?;
        let copy: T =
            serde_json::from_slice(&json).map_err(|e| CloneError::Deserialize(e.to_string()))?;
        if copy != self.0 {
            return Err(CloneError::Lossy(String::from_utf8_lossy(&json).into_owned()));
        }
        Ok(Self(copy))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        label: String,
        value: f64,
    }

    #[test]
    fn vec_copy_is_independent() {
        let original = vec!["a".to_string(), "b".to_string()];
        let mut copy = original.deep_clone().unwrap();
        copy[0].push('!');
        assert_eq!(original[0], "a");
        assert_eq!(copy[0], "a!");
    }

    #[test]
    fn nested_map_copy() {
        let mut original: HashMap<u32, Vec<u64>> = HashMap::new();
        original.insert(1, vec![10, 20]);
        let mut copy = original.deep_clone().unwrap();
        copy.get_mut(&1).unwrap().push(30);
        assert_eq!(original[&1], vec![10, 20]);
    }

    #[test]
    fn option_none_copies() {
        let none: Option<String> = None;
        assert_eq!(none.deep_clone().unwrap(), None);
    }

    #[test]
    fn json_snapshot_roundtrips_plain_values() {
        let snapshot = JsonSnapshot(Reading {
            label: "avg".to_string(),
            value: 12.5,
        });
        assert_eq!(snapshot.deep_clone().unwrap(), snapshot);
    }

    #[test]
    fn json_snapshot_rejects_nan() {
        let snapshot = JsonSnapshot(Reading {
            label: "avg".to_string(),
            value: f64::NAN,
        });
        assert!(snapshot.deep_clone().is_err());
    }
}
