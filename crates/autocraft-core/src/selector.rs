//! Pattern selection.
//!
//! When several patterns can produce the same item, the selector picks the
//! one whose matching outputs are scarcest in storage, so repeated requests
//! spread across variants instead of always crafting the same one. Equal
//! stock falls back to registration order, which makes the choice a total,
//! deterministic order.

use std::sync::Arc;

use tracing::trace;

use crate::inventory::ItemNetwork;
use crate::pattern::Pattern;
use crate::registry::PatternRegistry;
use crate::signature::{ComparisonFlags, ItemSignature};

/// Stock of the outputs of `pattern` that match the request.
///
/// Each matching output is counted by its exact signature.
fn output_stock(
    pattern: &Pattern,
    signature: &ItemSignature,
    flags: ComparisonFlags,
    network: &dyn ItemNetwork,
) -> u64 {
    pattern
        .outputs
        .iter()
        .filter(|o| o.signature.matches(signature, flags))
        .map(|o| network.stock(&o.signature, ComparisonFlags::DEFAULT))
        .sum()
}

/// Chooses one pattern for `signature`, or `None` when nothing produces it.
#[must_use]
pub fn get_pattern(
    registry: &PatternRegistry,
    signature: &ItemSignature,
    flags: ComparisonFlags,
    network: &dyn ItemNetwork,
) -> Option<Arc<Pattern>> {
    let candidates = registry.get_patterns(signature, flags);
    if candidates.len() <= 1 {
        return candidates.first().map(|p| Arc::clone(*p));
    }

    // Candidates arrive in registration order and `min_by_key` keeps the
    // first of equal keys.
    let chosen = candidates
        .into_iter()
        .min_by_key(|p| output_stock(p, signature, flags, network))?;
    trace!("Selected {} for {}", chosen.id, signature);
    Some(Arc::clone(chosen))
}

/// [`get_pattern`] with the default comparison flags.
#[must_use]
pub fn get_pattern_default(
    registry: &PatternRegistry,
    signature: &ItemSignature,
    network: &dyn ItemNetwork,
) -> Option<Arc<Pattern>> {
    get_pattern(registry, signature, ComparisonFlags::DEFAULT, network)
}
