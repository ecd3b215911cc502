//! Shared metadata machinery: the deferred-decode cache, text entries,
//! and the extension store for records the walkers don't understand.

pub mod segments;
pub mod subcodec;

use crate::error::{Error, Result};

pub use subcodec::{ColorProfile, Packet, TagTable};

// ── Deferred fields ──────────────────────────────────────────────────────────

/// Lazy-decode state for one metadata kind.
///
/// Transitions are one-way: `Raw` moves to `Decoded` or `Failed` on first
/// access and the raw bytes are discarded either way; after that every
/// access returns the cached outcome. `Absent` means the source never
/// carried this kind of metadata, which callers can tell apart from
/// "present but not yet decoded".
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Deferred<T> {
    #[default]
    Absent,
    Raw(Vec<u8>),
    Decoded(T),
    Failed(Error),
}

impl<T> Deferred<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Deferred::Absent)
    }

    /// The undecoded bytes, when decoding hasn't been attempted yet.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Deferred::Raw(b) => Some(b),
            _ => None,
        }
    }

    /// Explicit overwrite. Always wins: discards raw bytes and any cached
    /// decode error.
    pub fn set(&mut self, value: T) {
        *self = Deferred::Decoded(value);
    }

    /// Resolve the field, decoding through `decode` at most once.
    pub fn get_with<F>(&mut self, decode: F) -> Result<Option<&T>>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        if let Deferred::Raw(bytes) = self {
            *self = match decode(bytes) {
                Ok(v) => Deferred::Decoded(v),
                Err(e) => Deferred::Failed(e),
            };
        }
        match self {
            Deferred::Absent => Ok(None),
            Deferred::Decoded(v) => Ok(Some(v)),
            Deferred::Failed(e) => Err(e.clone()),
            // Raw was consumed by the transition above.
            Deferred::Raw(_) => Ok(None),
        }
    }
}

// ── Text entries ─────────────────────────────────────────────────────────────

/// Storage mode of a textual key/value annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextKind {
    #[default]
    Plain,
    Compressed,
    /// Compressed, with a language tag and translated key alongside.
    CompressedLocalized,
}

/// One entry in a container's key/value text store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextEntry {
    pub key: String,
    pub value: String,
    pub kind: TextKind,
    /// RFC 1766 language tag; only meaningful for localized entries.
    pub language_tag: String,
    /// The key translated into `language_tag`'s language.
    pub translated_key: String,
}

impl TextEntry {
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

// ── Extension store ──────────────────────────────────────────────────────────

/// Raw payloads of records the walker had no handler for, keyed by the
/// format's record-type identifier. Insertion order is preserved and
/// duplicate identifiers are kept as separate entries, never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionStore<K> {
    entries: Vec<(K, Vec<u8>)>,
}

impl<K> Default for ExtensionStore<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: PartialEq> ExtensionStore<K> {
    pub fn push(&mut self, id: K, payload: Vec<u8>) {
        self.entries.push((id, payload));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[u8])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// All payloads stored under `id`, in insertion order.
    pub fn get_all<'a>(&'a self, id: &'a K) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == id)
            .map(|(_, v)| v.as_slice())
    }
}
