//! Item signatures and comparison flags.
//!
//! An [`ItemSignature`] is the identity key used to match items against
//! pattern inputs and outputs. [`ComparisonFlags`] choose which parts of the
//! signature take part in a match; the base item type always does.

use autocraft_common::ItemTypeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

/// A single value inside item metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// String value
    Str(String),
    /// Ordered list of values
    List(Vec<MetaValue>),
    /// Nested key/value table
    Compound(BTreeMap<String, MetaValue>),
}

/// Extended structured metadata attached to an item (enchantments, fluid
/// contents, custom names, ...).
///
/// Keys are kept sorted so two tables with the same entries always compare
/// equal regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns this metadata with an extra entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: MetaValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    /// Returns the number of top-level entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Selects which [`ItemSignature`] fields participate in an equality test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComparisonFlags(u8);

impl ComparisonFlags {
    /// Only the base item type is compared.
    pub const NONE: Self = Self(0);
    /// Compare the variant (damage) value.
    pub const VARIANT: Self = Self(1);
    /// Compare extended metadata.
    pub const METADATA: Self = Self(1 << 1);
    /// Default lookup flags: variant and metadata.
    pub const DEFAULT: Self = Self(Self::VARIANT.0 | Self::METADATA.0);

    /// Creates flags from raw bits, discarding unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::DEFAULT.0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Checks whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ComparisonFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ComparisonFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Semantic identity of an item for matching purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemSignature {
    /// Base item type
    pub item: ItemTypeId,
    /// Variant (damage) value, 0 when the item has none
    #[serde(default)]
    pub variant: u32,
    /// Extended metadata
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl ItemSignature {
    /// Creates a signature for a plain item type.
    #[must_use]
    pub const fn new(item: ItemTypeId) -> Self {
        Self {
            item,
            variant: 0,
            metadata: None,
        }
    }

    /// Shorthand for a plain signature from a raw item ID.
    #[must_use]
    pub const fn of(item: u32) -> Self {
        Self::new(ItemTypeId::new(item))
    }

    /// Sets the variant value.
    #[must_use]
    pub const fn with_variant(mut self, variant: u32) -> Self {
        self.variant = variant;
        self
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Checks whether two signatures describe the same item under `flags`.
    ///
    /// Empty metadata and no metadata are treated as the same thing.
    #[must_use]
    pub fn matches(&self, other: &Self, flags: ComparisonFlags) -> bool {
        if self.item != other.item {
            return false;
        }
        if flags.contains(ComparisonFlags::VARIANT) && self.variant != other.variant {
            return false;
        }
        if flags.contains(ComparisonFlags::METADATA) {
            let ours = self.metadata.as_ref().filter(|m| !m.is_empty());
            let theirs = other.metadata.as_ref().filter(|m| !m.is_empty());
            if ours != theirs {
                return false;
            }
        }
        true
    }

    /// Creates a stack of this signature.
    #[must_use]
    pub fn stack(&self, quantity: u32) -> ItemStack {
        ItemStack::new(self.clone(), quantity)
    }
}

impl std::fmt::Display for ItemSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.item, self.variant)?;
        if self.metadata.as_ref().is_some_and(|m| !m.is_empty()) {
            write!(f, "{{..}}")?;
        }
        Ok(())
    }
}

/// A quantity of one item signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// What the items are
    pub signature: ItemSignature,
    /// How many
    pub quantity: u32,
}

impl ItemStack {
    /// Creates a new stack.
    #[must_use]
    pub const fn new(signature: ItemSignature, quantity: u32) -> Self {
        Self {
            signature,
            quantity,
        }
    }

    /// Shorthand for a plain stack from a raw item ID.
    #[must_use]
    pub const fn of(item: u32, quantity: u32) -> Self {
        Self::new(ItemSignature::of(item), quantity)
    }

    /// Checks if the stack holds nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity == 0
    }
}
