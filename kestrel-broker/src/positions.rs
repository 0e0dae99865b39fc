//! Net-position bookkeeping derived from venue leg reports.

use std::collections::HashMap;

use rust_decimal::Decimal;

use kestrel_core::{Direction, InstrumentId, Position, PositionLeg};

/// Signed net positions, rebuilt wholesale from each venue snapshot.
#[derive(Debug, Default)]
pub struct PositionTable {
    positions: HashMap<InstrumentId, Position>,
}

impl PositionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table from a full snapshot of directional legs.
    ///
    /// Legs fold in report order: net size accumulates long minus short,
    /// and the average price is taken from the leg whose direction matches
    /// the running net sign, otherwise the value accumulated so far stands.
    /// When both directions are nonzero for one instrument the resulting
    /// price is an approximation, a known limitation carried over from the
    /// venue's per-direction reporting. Replaying the same snapshot is
    /// idempotent; instruments absent from it read back as flat.
    pub fn apply_snapshot(&mut self, legs: &[PositionLeg]) {
        let mut rebuilt: HashMap<InstrumentId, Position> = HashMap::new();
        for leg in legs {
            let entry = rebuilt
                .entry(leg.instrument.clone())
                .or_insert_with(|| Position::flat(leg.instrument.clone()));
            let size = entry.size + leg.direction.signed(leg.volume);
            let price = if size < Decimal::ZERO {
                match leg.direction {
                    Direction::Short => leg.price,
                    Direction::Long => entry.price,
                }
            } else {
                match leg.direction {
                    Direction::Long => leg.price,
                    Direction::Short => entry.price,
                }
            };
            entry.size = size;
            entry.price = price;
        }
        self.positions = rebuilt;
    }

    /// Cloned position for an instrument, flat when none is held.
    #[must_use]
    pub fn get(&self, instrument: &InstrumentId) -> Position {
        self.positions
            .get(instrument)
            .cloned()
            .unwrap_or_else(|| Position::flat(instrument.clone()))
    }

    /// Cloned view of every held position.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
