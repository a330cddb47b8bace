// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers for the three tiers and for in-flight requests.
//!
//! Every manager, worker, and node receives a stable opaque id at
//! construction; lifecycle commands and method invocations receive one
//! per dispatch. All four families share one representation: a family
//! tag plus an opaque suffix, rendered up front (`wkr-Ik3…`) so an id
//! can be copied freely, compared and sorted by its text — the manager's
//! id-sorted broadcast order — and borrowed as a `&str` for filesystem
//! paths and socket registries. Families exist only at the type level,
//! so a `NodeId` can never be handed where a `WorkerId` is expected.

use std::cmp::Ordering;
use std::marker::PhantomData;

/// Tag namespace for one id family.
pub trait IdFamily {
    /// Rendered ahead of the suffix, e.g. `"wkr"`.
    const TAG: &'static str;
}

/// Characters in a generated suffix.
const SUFFIX_LEN: usize = 20;

/// Inline text capacity. Generated ids use `TAG.len() + 1 + SUFFIX_LEN`
/// bytes; ids accepted from outside (a CLI `--id`, a peer's snapshot)
/// are clipped here at a character boundary.
const TEXT_CAPACITY: usize = 40;

/// A copyable identifier belonging to family `F`.
pub struct Id<F> {
    text: [u8; TEXT_CAPACITY],
    len: u8,
    family: PhantomData<F>,
}

fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl<F: IdFamily> Id<F> {
    /// Generate a fresh id: the family tag plus a random suffix.
    pub fn new() -> Self {
        Self::from_string(format!("{}-{}", F::TAG, nanoid::nanoid!(SUFFIX_LEN)))
    }

    /// Adopt an id issued elsewhere, clipped to capacity. The text is
    /// taken as-is: external ids are opaque and carry no required shape.
    pub fn from_string(text: impl AsRef<str>) -> Self {
        let text = clip(text.as_ref(), TEXT_CAPACITY);
        let mut buf = [0u8; TEXT_CAPACITY];
        buf[..text.len()].copy_from_slice(text.as_bytes());
        Self { text: buf, len: text.len() as u8, family: PhantomData }
    }

    pub fn as_str(&self) -> &str {
        // Construction only ever copies from a clipped &str.
        std::str::from_utf8(&self.text[..self.len as usize]).unwrap_or("")
    }

    /// The family tag of this id type.
    pub fn tag() -> &'static str {
        F::TAG
    }

    /// The text after `"<tag>-"`, or the whole text for ids that were
    /// adopted without the family shape.
    pub fn suffix(&self) -> &str {
        let text = self.as_str();
        match text.strip_prefix(F::TAG) {
            Some(rest) => rest.strip_prefix('-').unwrap_or(rest),
            None => text,
        }
    }

    /// At most `n` characters of the suffix, for compact log lines.
    pub fn short(&self, n: usize) -> &str {
        clip(self.suffix(), n)
    }
}

impl<F: IdFamily> Default for Id<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Clone for Id<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for Id<F> {}

impl<F: IdFamily> PartialEq for Id<F> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<F: IdFamily> Eq for Id<F> {}

impl<F: IdFamily> std::hash::Hash for Id<F> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Must match str's hash for Borrow<str> map lookups.
        self.as_str().hash(state);
    }
}

impl<F: IdFamily> PartialOrd for Id<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: IdFamily> Ord for Id<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl<F: IdFamily> std::borrow::Borrow<str> for Id<F> {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl<F: IdFamily> AsRef<str> for Id<F> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl<F: IdFamily> std::fmt::Display for Id<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<F: IdFamily> std::fmt::Debug for Id<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl<F: IdFamily> serde::Serialize for Id<F> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de, F: IdFamily> serde::Deserialize<'de> for Id<F> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TextVisitor<F>(PhantomData<F>);

        impl<F: IdFamily> serde::de::Visitor<'_> for TextVisitor<F> {
            type Value = Id<F>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "a {} id", F::TAG)
            }

            fn visit_str<E: serde::de::Error>(self, text: &str) -> Result<Id<F>, E> {
                Ok(Id::from_string(text))
            }
        }

        deserializer.deserialize_str(TextVisitor(PhantomData))
    }
}

/// The four families. Empty enums: no values, only tags.
pub enum ManagerFamily {}
pub enum WorkerFamily {}
pub enum NodeFamily {}
pub enum RequestFamily {}

impl IdFamily for ManagerFamily {
    const TAG: &'static str = "mgr";
}

impl IdFamily for WorkerFamily {
    const TAG: &'static str = "wkr";
}

impl IdFamily for NodeFamily {
    const TAG: &'static str = "nod";
}

impl IdFamily for RequestFamily {
    const TAG: &'static str = "req";
}

/// Identifier for a Manager instance.
pub type ManagerId = Id<ManagerFamily>;
/// Identifier for a Worker instance.
pub type WorkerId = Id<WorkerFamily>;
/// Identifier for a Node (one pipeline vertex).
pub type NodeId = Id<NodeFamily>;
/// Correlation id for an in-flight request (lifecycle command or
/// registered-method invocation).
pub type RequestId = Id<RequestFamily>;

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
