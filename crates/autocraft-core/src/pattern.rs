//! Crafting patterns.

use autocraft_common::{PatternDefinitionError, PatternId};
use serde::{Deserialize, Serialize};

use crate::signature::{ComparisonFlags, ItemSignature, ItemStack};

/// Result type for pattern construction.
pub type PatternResult<T> = Result<T, PatternDefinitionError>;

fn default_input_flags() -> ComparisonFlags {
    ComparisonFlags::DEFAULT
}

/// A crafting pattern: consumes its inputs and produces its outputs.
///
/// Patterns are immutable once registered. The registry hands them out as
/// `Arc<Pattern>` so a task keeps its bound pattern alive across a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Stable identifier
    pub id: PatternId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Required inputs, consumed per craft
    #[serde(default)]
    pub inputs: Vec<ItemStack>,
    /// Produced outputs, per craft
    pub outputs: Vec<ItemStack>,
    /// How inputs are matched against stock
    #[serde(default = "default_input_flags")]
    pub input_flags: ComparisonFlags,
    /// Ticks spent crafting once every input is gathered
    #[serde(default)]
    pub craft_time: u32,
}

impl Pattern {
    /// Creates a new pattern builder.
    #[must_use]
    pub fn builder(id: PatternId, name: impl Into<String>) -> PatternBuilder {
        PatternBuilder::new(id, name)
    }

    /// Checks that the pattern produces something and has no empty entries.
    pub fn validate(&self) -> PatternResult<()> {
        if self.outputs.is_empty() {
            return Err(PatternDefinitionError::NoOutputs(self.id));
        }
        if self
            .inputs
            .iter()
            .chain(&self.outputs)
            .any(ItemStack::is_empty)
        {
            return Err(PatternDefinitionError::ZeroQuantity { pattern: self.id });
        }
        Ok(())
    }

    /// Units of `signature` produced by one craft, counting every matching
    /// output entry.
    #[must_use]
    pub fn output_quantity_of(&self, signature: &ItemSignature, flags: ComparisonFlags) -> u32 {
        self.outputs
            .iter()
            .filter(|o| o.signature.matches(signature, flags))
            .map(|o| o.quantity)
            .sum()
    }

    /// Checks whether any output matches `signature` under `flags`.
    #[must_use]
    pub fn produces(&self, signature: &ItemSignature, flags: ComparisonFlags) -> bool {
        self.outputs
            .iter()
            .any(|o| o.signature.matches(signature, flags))
    }

    /// The primary output (first entry).
    #[must_use]
    pub fn primary_output(&self) -> Option<&ItemStack> {
        self.outputs.first()
    }
}

/// Builder for creating patterns.
#[derive(Debug)]
pub struct PatternBuilder {
    id: PatternId,
    name: String,
    inputs: Vec<ItemStack>,
    outputs: Vec<ItemStack>,
    input_flags: ComparisonFlags,
    craft_time: u32,
}

impl PatternBuilder {
    fn new(id: PatternId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_flags: ComparisonFlags::DEFAULT,
            craft_time: 0,
        }
    }

    /// Adds an input requirement.
    #[must_use]
    pub fn input(mut self, signature: ItemSignature, quantity: u32) -> Self {
        self.inputs.push(ItemStack::new(signature, quantity));
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn output(mut self, signature: ItemSignature, quantity: u32) -> Self {
        self.outputs.push(ItemStack::new(signature, quantity));
        self
    }

    /// Sets how inputs are matched against stock.
    #[must_use]
    pub const fn input_flags(mut self, flags: ComparisonFlags) -> Self {
        self.input_flags = flags;
        self
    }

    /// Sets the craft time in ticks.
    #[must_use]
    pub const fn craft_time(mut self, ticks: u32) -> Self {
        self.craft_time = ticks;
        self
    }

    /// Builds and validates the pattern.
    pub fn build(self) -> PatternResult<Pattern> {
        let pattern = Pattern {
            id: self.id,
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            input_flags: self.input_flags,
            craft_time: self.craft_time,
        };
        pattern.validate()?;
        Ok(pattern)
    }
}
