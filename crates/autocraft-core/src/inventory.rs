//! Inventory network collaborator.
//!
//! The manager never owns item storage. It reads stock and moves items
//! through the [`ItemNetwork`] trait, implemented by the embedding
//! application. [`NetworkStorage`] is a simple in-memory implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::{ComparisonFlags, ItemSignature, ItemStack};

/// Inventory error types.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not enough items
    #[error("Not enough items: need {needed}, have {have}")]
    NotEnough {
        /// Amount needed
        needed: u64,
        /// Amount available
        have: u64,
    },
    /// Storage full
    #[error("Storage full: capacity {capacity}")]
    Full {
        /// Storage capacity in distinct stacks
        capacity: u32,
    },
    /// Stack would exceed the per-stack limit
    #[error("Stack overflow: {stored} stored, {adding} more does not fit")]
    StackOverflow {
        /// Units already stored
        stored: u32,
        /// Units being added
        adding: u32,
    },
}

/// Result type for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// The shared item pool tasks draw ingredients from and deliver results to.
pub trait ItemNetwork {
    /// Units in storage matching `signature` under `flags`.
    fn stock(&self, signature: &ItemSignature, flags: ComparisonFlags) -> u64;

    /// Removes up to `quantity` matching units. Returns the exact stacks
    /// removed, which may differ from `signature` when `flags` are loose.
    fn extract(
        &mut self,
        signature: &ItemSignature,
        quantity: u32,
        flags: ComparisonFlags,
    ) -> Vec<ItemStack>;

    /// Stores a stack. Returns how many units did not fit.
    fn insert(&mut self, stack: &ItemStack) -> u32;
}

/// An in-memory storage network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStorage {
    /// Stored stacks, one entry per exact signature
    stacks: Vec<ItemStack>,
    /// Maximum distinct signatures
    capacity: u32,
}

impl Default for NetworkStorage {
    fn default() -> Self {
        Self::new(u32::MAX)
    }
}

impl NetworkStorage {
    /// Creates a new storage with the given capacity in distinct stacks.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            stacks: Vec::new(),
            capacity,
        }
    }

    /// Returns the number of distinct stored signatures.
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.stacks.len() as u32
    }

    /// Returns the capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the exact count of one signature.
    #[must_use]
    pub fn count(&self, signature: &ItemSignature) -> u64 {
        self.stock(signature, ComparisonFlags::DEFAULT)
    }

    /// Adds items.
    pub fn add(&mut self, signature: &ItemSignature, amount: u32) -> InventoryResult<()> {
        if amount == 0 {
            return Ok(());
        }
        if let Some(stack) = self.exact_mut(signature) {
            let total = stack
                .quantity
                .checked_add(amount)
                .ok_or(InventoryError::StackOverflow {
                    stored: stack.quantity,
                    adding: amount,
                })?;
            stack.quantity = total;
            return Ok(());
        }
        if self.slot_count() >= self.capacity {
            return Err(InventoryError::Full {
                capacity: self.capacity,
            });
        }
        self.stacks.push(signature.stack(amount));
        Ok(())
    }

    /// Removes items, matching exactly.
    pub fn remove(&mut self, signature: &ItemSignature, amount: u32) -> InventoryResult<()> {
        let have = self.count(signature);
        if have < u64::from(amount) {
            return Err(InventoryError::NotEnough {
                needed: u64::from(amount),
                have,
            });
        }
        self.extract(signature, amount, ComparisonFlags::DEFAULT);
        Ok(())
    }

    /// Returns an iterator over all stored stacks.
    pub fn iter(&self) -> impl Iterator<Item = &ItemStack> + '_ {
        self.stacks.iter()
    }

    fn exact_mut(&mut self, signature: &ItemSignature) -> Option<&mut ItemStack> {
        self.stacks
            .iter_mut()
            .find(|s| s.signature.matches(signature, ComparisonFlags::DEFAULT))
    }
}

impl ItemNetwork for NetworkStorage {
    fn stock(&self, signature: &ItemSignature, flags: ComparisonFlags) -> u64 {
        self.stacks
            .iter()
            .filter(|s| s.signature.matches(signature, flags))
            .map(|s| u64::from(s.quantity))
            .sum()
    }

    fn extract(
        &mut self,
        signature: &ItemSignature,
        quantity: u32,
        flags: ComparisonFlags,
    ) -> Vec<ItemStack> {
        let mut remaining = quantity;
        let mut taken = Vec::new();
        for stack in &mut self.stacks {
            if remaining == 0 {
                break;
            }
            if stack.signature.matches(signature, flags) {
                let amount = stack.quantity.min(remaining);
                if amount > 0 {
                    stack.quantity -= amount;
                    remaining -= amount;
                    taken.push(stack.signature.stack(amount));
                }
            }
        }
        self.stacks.retain(|s| !s.is_empty());
        taken
    }

    fn insert(&mut self, stack: &ItemStack) -> u32 {
        if stack.quantity == 0 {
            return 0;
        }
        if let Some(existing) = self.exact_mut(&stack.signature) {
            let room = u32::MAX - existing.quantity;
            let stored = room.min(stack.quantity);
            existing.quantity += stored;
            return stack.quantity - stored;
        }
        match self.add(&stack.signature, stack.quantity) {
            Ok(()) => 0,
            Err(_) => stack.quantity,
        }
    }
}
