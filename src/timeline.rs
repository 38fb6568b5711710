//! The live, ordered timeline of recorded steps and groups.
//!
//! Items are held in an [`IndexMap`] keyed by id, so lookups are by identity
//! while the map's order is the display and application order.

use crate::config::AgentConfig;
use crate::error::{PatternError, Result};
use crate::formula::{CellCoord, cell_label, parse_cell_label};
use crate::model::{Group, ItemId, Step, StepKind, TimelineItem};
use crate::patterns::Pattern;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_GROUP_NAME: &str = "New group";

/// Shallow patch for [`Timeline::update`]. Fields that do not apply to the
/// addressed item are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub disabled: Option<bool>,
    pub collapsed: Option<bool>,
    pub name: Option<String>,
    pub target: Option<CellCoord>,
    /// Alternative to `target`, as a label like `"D2"`. Ignored when `target` is set.
    pub a1: Option<String>,
    pub formula: Option<String>,
}

impl ItemPatch {
    pub fn disabled(disabled: bool) -> Self {
        Self {
            disabled: Some(disabled),
            ..Default::default()
        }
    }

    pub fn collapsed(collapsed: bool) -> Self {
        Self {
            collapsed: Some(collapsed),
            ..Default::default()
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn formula(target: Option<CellCoord>, formula: Option<String>) -> Self {
        Self {
            target,
            formula,
            ..Default::default()
        }
    }

    fn apply_to_step(&self, step: &mut Step) {
        if let Some(disabled) = self.disabled {
            step.disabled = disabled;
        }
        if let StepKind::ApplyFormula {
            target, a1, formula, ..
        } = &mut step.kind
        {
            let new_target = self.target.or_else(|| {
                self.a1
                    .as_deref()
                    .and_then(|label| parse_cell_label(label).ok())
            });
            if let Some(new_target) = new_target {
                *target = new_target;
                *a1 = cell_label(new_target);
            }
            if let Some(new_formula) = &self.formula {
                *formula = new_formula.clone();
            }
        }
    }

    fn apply_to_group(&self, group: &mut Group) {
        if let Some(collapsed) = self.collapsed {
            group.collapsed = collapsed;
        }
        if let Some(name) = &self.name {
            group.name = name.clone();
        }
        if let Some(disabled) = self.disabled {
            for step in &mut group.items {
                step.disabled = disabled;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    items: IndexMap<ItemId, TimelineItem>,
    default_group_name: String,
    revision: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::with_default_group_name(DEFAULT_GROUP_NAME)
    }

    pub fn with_default_group_name(name: impl Into<String>) -> Self {
        Self {
            items: IndexMap::new(),
            default_group_name: name.into(),
            revision: 0,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::with_default_group_name(config.default_group_name.clone())
    }

    pub fn from_items(items: impl IntoIterator<Item = TimelineItem>) -> Self {
        let mut timeline = Self::new();
        timeline.items = items
            .into_iter()
            .map(|item| (item.id().clone(), item))
            .collect();
        timeline
    }

    /// Bumped on every mutation; derived views compare it to know when to rebuild.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &TimelineItem> {
        self.items.values()
    }

    pub fn get(&self, id: &ItemId) -> Option<&TimelineItem> {
        self.items.get(id)
    }

    pub fn index_of(&self, id: &ItemId) -> Option<usize> {
        self.items.get_index_of(id)
    }

    /// Whether `id` names a top-level item or a step inside a group.
    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
            || self
                .items
                .values()
                .filter_map(TimelineItem::as_group)
                .any(|group| group.position_of(id).is_some())
    }

    pub fn snapshot(&self) -> Vec<TimelineItem> {
        self.items.values().cloned().collect()
    }

    pub fn step_count(&self) -> usize {
        self.items.values().map(TimelineItem::step_count).sum()
    }

    /// Steps in application order with groups expanded and disabled steps dropped.
    pub fn flatten_enabled(&self) -> Vec<Step> {
        self.items
            .values()
            .flat_map(TimelineItem::steps)
            .filter(|step| !step.disabled)
            .cloned()
            .collect()
    }

    /// Drop selected ids that no longer exist in the timeline.
    pub fn retain_present(&self, selection: &mut Vec<ItemId>) {
        selection.retain(|id| self.contains(id));
    }

    pub fn insert(&mut self, step: Step) -> ItemId {
        let id = step.id.clone();
        debug!(step_id = %id, kind = step.kind.as_ref(), "recording step");
        self.items.insert(id.clone(), TimelineItem::Step(step));
        self.touch();
        id
    }

    /// Append copies of `items` under fresh ids.
    pub fn load_items(&mut self, items: &[TimelineItem]) -> Vec<ItemId> {
        let ids = items
            .iter()
            .filter(|item| !item.is_empty_group())
            .map(|item| {
                let copy = item.with_fresh_ids();
                let id = copy.id().clone();
                self.items.insert(id.clone(), copy);
                id
            })
            .collect();
        self.touch();
        ids
    }

    pub fn load_pattern(&mut self, pattern: &Pattern) -> Vec<ItemId> {
        debug!(pattern_id = %pattern.id, steps = pattern.step_count(), "loading pattern");
        self.load_items(&pattern.items)
    }

    /// Replace the whole sequence, e.g. after a drag-and-drop.
    pub fn reorder(&mut self, new_order: Vec<TimelineItem>) {
        self.items = new_order
            .into_iter()
            .map(|item| (item.id().clone(), item))
            .collect();
        self.touch();
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }
        self.items.move_index(from, to);
        self.touch();
        true
    }

    /// Apply `patch` to the item (or grouped step) with `id`. Unknown ids are ignored.
    pub fn update(&mut self, id: &ItemId, patch: &ItemPatch) -> bool {
        if let Some(item) = self.items.get_mut(id) {
            match item {
                TimelineItem::Step(step) => patch.apply_to_step(step),
                TimelineItem::Group(group) => patch.apply_to_group(group),
            }
            self.touch();
            return true;
        }

        let nested = self.items.values_mut().find_map(|item| match item {
            TimelineItem::Group(group) => group.items.iter_mut().find(|s| &s.id == id),
            TimelineItem::Step(_) => None,
        });
        match nested {
            Some(step) => {
                patch.apply_to_step(step);
                self.touch();
                true
            }
            None => {
                debug!(item_id = %id, "update ignored for unknown item");
                false
            }
        }
    }

    /// Remove a top-level item. A group takes its steps with it.
    pub fn delete_item(&mut self, id: &ItemId) -> Option<TimelineItem> {
        let removed = self.items.shift_remove(id)?;
        debug!(item_id = %id, steps = removed.step_count(), "deleted timeline item");
        self.touch();
        Some(removed)
    }

    /// Remove one step from a group, deleting the group once it is empty.
    pub fn remove_step_from_group(&mut self, group_id: &ItemId, step_id: &ItemId) -> Option<Step> {
        let group = match self.items.get_mut(group_id) {
            Some(TimelineItem::Group(group)) => group,
            _ => return None,
        };
        let position = group.position_of(step_id)?;
        let step = group.items.remove(position);
        if group.is_empty() {
            self.items.shift_remove(group_id);
            debug!(group_id = %group_id, "removed empty group");
        }
        self.touch();
        Some(step)
    }

    /// Take a step out of its group and place it right after the group.
    pub fn move_step_out_of_group(&mut self, group_id: &ItemId, step_id: &ItemId) -> bool {
        let Some(group_index) = self.items.get_index_of(group_id) else {
            return false;
        };
        let Some(step) = self.remove_step_from_group(group_id, step_id) else {
            return false;
        };
        // The group may have been dropped along with its last step.
        let insert_at = if self.items.contains_key(group_id) {
            group_index + 1
        } else {
            group_index
        };
        self.items
            .shift_insert(insert_at, step.id.clone(), TimelineItem::Step(step));
        self.touch();
        true
    }

    /// Merge the selected top-level items into one new group.
    ///
    /// The group takes the position of the earliest selected item and holds
    /// the selected items' steps in timeline order.
    pub fn merge_selected(&mut self, selected: &[ItemId]) -> Result<ItemId> {
        let mut indices: Vec<usize> = selected
            .iter()
            .filter_map(|id| self.items.get_index_of(id))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        if indices.len() < 2 {
            return Err(PatternError::validation(
                "selection",
                "select at least two timeline items to merge",
            ));
        }

        let insert_at = indices[0];
        let mut removed = Vec::with_capacity(indices.len());
        for &index in indices.iter().rev() {
            if let Some((_, item)) = self.items.shift_remove_index(index) {
                removed.push(item);
            }
        }
        removed.reverse();

        let steps: Vec<Step> = removed.into_iter().flat_map(TimelineItem::into_steps).collect();
        let group = Group::new(self.default_group_name.clone(), steps);
        let group_id = group.id.clone();
        debug!(
            group_id = %group_id,
            merged_items = indices.len(),
            steps = group.len(),
            "merged selection into group"
        );
        self.items
            .shift_insert(insert_at, group_id.clone(), TimelineItem::Group(group));
        self.touch();
        Ok(group_id)
    }

    /// Replace a group with its steps at the same position.
    pub fn ungroup(&mut self, group_id: &ItemId) -> bool {
        let Some(index) = self.items.get_index_of(group_id) else {
            return false;
        };
        if !matches!(self.items[index], TimelineItem::Group(_)) {
            return false;
        }
        let Some((_, TimelineItem::Group(group))) = self.items.shift_remove_index(index) else {
            return false;
        };
        for (offset, step) in group.items.into_iter().enumerate() {
            self.items
                .shift_insert(index + offset, step.id.clone(), TimelineItem::Step(step));
        }
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
