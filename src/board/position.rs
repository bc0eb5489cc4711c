//! Gapped integer positions for cards inside a column.
//!
//! Cards are ordered by a large-stride integer key so that a card can be
//! dropped between two neighbours by taking their midpoint, without touching
//! the rest of the column. When gaps shrink below the rebalance threshold (or
//! the column creeps toward the top of the range) the whole column is
//! respaced evenly by [`PositionAllocator::rebalance_column`].

use serde::{Deserialize, Serialize};

use crate::config::PositionSettings;
use crate::errors::BoardError;

/// Smaller step used by `next_position` when a full increment would overflow.
const OVERFLOW_STEP: i64 = 100;

/// A card's identity and current position, as the allocator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedItem {
    pub id: String,
    pub position: i64,
}

impl PositionedItem {
    pub fn new(id: impl Into<String>, position: i64) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// Where a card should land in its destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    /// Use this exact position (must be in range and not already taken).
    Exact { position: i64 },
    /// 0-based slot among the column's other cards; clamps at both ends.
    AtIndex { index: usize },
    /// Land after `after` and/or before `before`, both named by task id.
    Between {
        after: Option<String>,
        before: Option<String>,
    },
    Append,
}

/// A computed position plus the 0-based slot it stands for among the
/// column's other cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub position: i64,
    pub index: usize,
}

/// One card whose stored position a rebalance changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionUpdate {
    pub id: String,
    pub old_position: i64,
    pub new_position: i64,
}

#[derive(Debug, Clone)]
pub struct PositionAllocator {
    settings: PositionSettings,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::new(PositionSettings::default())
    }
}

impl PositionAllocator {
    pub fn new(settings: PositionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PositionSettings {
        &self.settings
    }

    /// Midpoint between two neighbours.
    ///
    /// Inverted or equal inputs fall back to `after + increment`. When the
    /// neighbours are adjacent integers there is no free slot; `before + 1`
    /// is returned and the resulting collision marks the column for rebalance.
    pub fn position_between(&self, before: i64, after: i64) -> i64 {
        if before >= after {
            return after.saturating_add(self.settings.default_increment);
        }
        let mid = before + (after - before) / 2;
        if mid == before || mid == after {
            return before + 1;
        }
        mid
    }

    pub fn next_position(&self, current: i64) -> i64 {
        let PositionSettings {
            min_position,
            max_position,
            default_increment,
            ..
        } = self.settings;
        let mut next = current.saturating_add(default_increment);
        if next > max_position {
            next = current.saturating_add(OVERFLOW_STEP);
        }
        next.clamp(min_position, max_position)
    }

    pub fn prev_position(&self, current: i64) -> i64 {
        let PositionSettings {
            min_position,
            max_position,
            default_increment,
            ..
        } = self.settings;
        let mut prev = current.saturating_sub(default_increment);
        if prev < min_position {
            prev = current / 2;
        }
        prev.clamp(min_position, max_position)
    }

    /// Position for `moving_id` in a column whose cards are given in
    /// ascending position order. The moving card is ignored if present.
    pub fn calculate_new_position(
        &self,
        column: &[PositionedItem],
        moving_id: &str,
        placement: &Placement,
    ) -> Result<i64, BoardError> {
        self.calculate_slot(column, moving_id, placement)
            .map(|slot| slot.position)
    }

    /// Like [`calculate_new_position`](Self::calculate_new_position), but
    /// also reports which slot among the other cards the placement meant.
    /// The index disambiguates a position that ties with a neighbour.
    pub fn calculate_slot(
        &self,
        column: &[PositionedItem],
        moving_id: &str,
        placement: &Placement,
    ) -> Result<Slot, BoardError> {
        let others: Vec<&PositionedItem> =
            column.iter().filter(|item| item.id != moving_id).collect();
        let slot = |position, index| Ok(Slot { position, index });

        match placement {
            Placement::Exact { position } => {
                self.check_candidate(others.iter().copied(), *position)?;
                let index = others.iter().filter(|item| item.position < *position).count();
                slot(*position, index)
            }
            Placement::Append => slot(self.append_after(others.last().copied()), others.len()),
            Placement::AtIndex { index } => {
                let Some(first) = others.first() else {
                    return slot(self.settings.min_position, 0);
                };
                if *index == 0 {
                    return slot(self.prev_position(first.position), 0);
                }
                if *index >= others.len() {
                    return slot(self.append_after(others.last().copied()), others.len());
                }
                slot(
                    self.position_between(others[index - 1].position, others[*index].position),
                    *index,
                )
            }
            Placement::Between { after, before } => {
                let locate = |id: &String| {
                    others
                        .iter()
                        .position(|item| &item.id == id)
                        .ok_or_else(|| BoardError::ReferenceNotFound { id: id.clone() })
                };
                match (after, before) {
                    (Some(after), Some(before)) => {
                        let lo = locate(after)?;
                        let hi = locate(before)?;
                        slot(
                            self.position_between(others[lo].position, others[hi].position),
                            lo + 1,
                        )
                    }
                    (Some(after), None) => {
                        let idx = locate(after)?;
                        let position = match others.get(idx + 1) {
                            Some(next) => self.position_between(others[idx].position, next.position),
                            None => self.next_position(others[idx].position),
                        };
                        slot(position, idx + 1)
                    }
                    (None, Some(before)) => {
                        let idx = locate(before)?;
                        let position = if idx == 0 {
                            self.prev_position(others[idx].position)
                        } else {
                            self.position_between(others[idx - 1].position, others[idx].position)
                        };
                        slot(position, idx)
                    }
                    (None, None) => {
                        slot(self.append_after(others.last().copied()), others.len())
                    }
                }
            }
        }
    }

    fn append_after(&self, last: Option<&PositionedItem>) -> i64 {
        match last {
            Some(item) => self.next_position(item.position),
            None => self.settings.min_position,
        }
    }

    /// Evenly spaced target position for every card, in display order.
    pub fn target_positions(&self, count: usize) -> Vec<i64> {
        let PositionSettings {
            min_position,
            max_position,
            default_increment,
            ..
        } = self.settings;
        let span = (max_position - min_position) / (count as i64 + 1);
        let increment = default_increment.max(span);
        (0..count)
            .map(|i| min_position.saturating_add((i as i64 + 1).saturating_mul(increment)))
            .collect()
    }

    /// Positions to rewrite so the column is evenly spaced again.
    ///
    /// Cards already within `rebalance_threshold` of their target are left
    /// alone, so rebalancing a balanced column returns no updates.
    pub fn rebalance_column(&self, column: &[PositionedItem]) -> Vec<PositionUpdate> {
        let targets = self.target_positions(column.len());
        column
            .iter()
            .zip(targets)
            .filter(|(item, target)| {
                (item.position - target).abs() > self.settings.rebalance_threshold
            })
            .map(|(item, target)| PositionUpdate {
                id: item.id.clone(),
                old_position: item.position,
                new_position: target,
            })
            .collect()
    }

    /// The column's positions after applying `rebalance_column`.
    pub fn rebalanced(&self, column: &[PositionedItem]) -> Vec<PositionedItem> {
        let updates = self.rebalance_column(column);
        column
            .iter()
            .map(|item| {
                let position = updates
                    .iter()
                    .find(|u| u.id == item.id)
                    .map_or(item.position, |u| u.new_position);
                PositionedItem::new(item.id.clone(), position)
            })
            .collect()
    }

    /// Whether an ascending list of positions is due for a rebalance.
    pub fn needs_rebalance(&self, positions: &[i64]) -> bool {
        let PositionSettings {
            min_position,
            max_position,
            default_increment,
            rebalance_threshold,
        } = self.settings;
        if positions
            .iter()
            .any(|p| *p < min_position || *p > max_position)
        {
            return true;
        }
        if positions
            .last()
            .is_some_and(|last| *last > max_position - default_increment)
        {
            return true;
        }
        positions
            .windows(2)
            .any(|pair| pair[1] <= pair[0] || pair[1] - pair[0] < rebalance_threshold)
    }

    pub fn validate_position(
        &self,
        column: &[PositionedItem],
        candidate: i64,
    ) -> Result<(), BoardError> {
        self.check_candidate(column.iter(), candidate)
    }

    fn check_candidate<'a>(
        &self,
        mut column: impl Iterator<Item = &'a PositionedItem>,
        candidate: i64,
    ) -> Result<(), BoardError> {
        let PositionSettings {
            min_position,
            max_position,
            ..
        } = self.settings;
        if candidate < min_position || candidate > max_position {
            return Err(BoardError::validation(format!(
                "position {} is outside [{}, {}]",
                candidate, min_position, max_position
            )));
        }
        if column.any(|item| item.position == candidate) {
            return Err(BoardError::PositionConflict {
                position: candidate,
            });
        }
        Ok(())
    }
}
