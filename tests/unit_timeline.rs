use assert_matches::assert_matches;
use pattern_agent::{
    AgentConfig, CellCoord, ItemId, ItemPatch, PatternError, Step, StepKind, Timeline,
    TimelineItem,
};
use proptest::prelude::*;

fn top_level_ids(timeline: &Timeline) -> Vec<ItemId> {
    timeline.items().map(|item| item.id().clone()).collect()
}

fn flat_ids(timeline: &Timeline) -> Vec<ItemId> {
    timeline
        .items()
        .flat_map(TimelineItem::steps)
        .map(|step| step.id.clone())
        .collect()
}

fn timeline_of(count: u32) -> (Timeline, Vec<ItemId>) {
    let mut timeline = Timeline::new();
    let ids = (0..count)
        .map(|i| timeline.insert(Step::delete_column(i)))
        .collect();
    (timeline, ids)
}

#[test]
fn merge_places_group_at_earliest_selected_position() {
    let (mut timeline, ids) = timeline_of(4);
    // Selection order does not matter; timeline order does.
    let group_id = timeline
        .merge_selected(&[ids[3].clone(), ids[1].clone()])
        .expect("merge");

    let top = top_level_ids(&timeline);
    assert_eq!(top, vec![ids[0].clone(), group_id.clone(), ids[2].clone()]);

    let group = timeline.get(&group_id).and_then(TimelineItem::as_group).unwrap();
    assert_eq!(group.name, "New group");
    assert!(!group.collapsed);
    let grouped: Vec<_> = group.items.iter().map(|s| s.id.clone()).collect();
    assert_eq!(grouped, vec![ids[1].clone(), ids[3].clone()]);
}

#[test]
fn merge_flattens_selected_groups() {
    let (mut timeline, ids) = timeline_of(4);
    let first = timeline
        .merge_selected(&[ids[0].clone(), ids[1].clone()])
        .unwrap();
    let merged = timeline
        .merge_selected(&[first, ids[2].clone()])
        .unwrap();

    let group = timeline.get(&merged).and_then(TimelineItem::as_group).unwrap();
    assert_eq!(group.len(), 3);
    assert_eq!(timeline.len(), 2);
    assert_eq!(flat_ids(&timeline), ids);
}

#[test]
fn merge_needs_two_items() {
    let (mut timeline, ids) = timeline_of(2);
    let unknown = ItemId::new_unchecked("missing");
    let err = timeline
        .merge_selected(&[ids[0].clone(), unknown])
        .unwrap_err();
    assert_matches!(err, PatternError::Validation { field: "selection", .. });
    assert_eq!(top_level_ids(&timeline), ids);
}

#[test]
fn default_group_name_comes_from_config() {
    let config = AgentConfig {
        default_group_name: "Batch".into(),
        ..Default::default()
    };
    let mut timeline = Timeline::from_config(&config);
    let a = timeline.insert(Step::delete_column(0));
    let b = timeline.insert(Step::delete_column(1));
    let group = timeline.merge_selected(&[a, b]).unwrap();
    assert_eq!(
        timeline.get(&group).and_then(TimelineItem::as_group).unwrap().name,
        "Batch"
    );
}

#[test]
fn removing_the_last_grouped_step_removes_the_group() {
    let (mut timeline, ids) = timeline_of(2);
    let group = timeline
        .merge_selected(&[ids[0].clone(), ids[1].clone()])
        .unwrap();

    assert!(timeline.remove_step_from_group(&group, &ids[0]).is_some());
    assert!(timeline.get(&group).is_some());
    assert!(timeline.remove_step_from_group(&group, &ids[1]).is_some());
    assert!(timeline.get(&group).is_none());
    assert!(timeline.is_empty());
}

#[test]
fn moving_a_step_out_lands_right_after_its_group() {
    let (mut timeline, ids) = timeline_of(4);
    let group = timeline
        .merge_selected(&[ids[0].clone(), ids[1].clone(), ids[2].clone()])
        .unwrap();

    assert!(timeline.move_step_out_of_group(&group, &ids[1]));
    assert_eq!(
        top_level_ids(&timeline),
        vec![group.clone(), ids[1].clone(), ids[3].clone()]
    );
    assert_eq!(timeline.get(&group).unwrap().step_count(), 2);
}

#[test]
fn moving_the_only_step_out_replaces_the_group() {
    let (mut timeline, ids) = timeline_of(3);
    let group = timeline
        .merge_selected(&[ids[1].clone(), ids[2].clone()])
        .unwrap();
    timeline.move_step_out_of_group(&group, &ids[1]);
    timeline.move_step_out_of_group(&group, &ids[2]);

    assert_eq!(
        top_level_ids(&timeline),
        vec![ids[0].clone(), ids[2].clone(), ids[1].clone()]
    );
    assert!(!timeline.move_step_out_of_group(&group, &ids[2]));
}

#[test]
fn deleting_a_group_removes_its_steps() {
    let (mut timeline, ids) = timeline_of(3);
    let group = timeline
        .merge_selected(&[ids[0].clone(), ids[1].clone()])
        .unwrap();

    let removed = timeline.delete_item(&group).expect("group removed");
    assert_eq!(removed.step_count(), 2);
    assert_eq!(flat_ids(&timeline), vec![ids[2].clone()]);
    assert!(timeline.delete_item(&group).is_none());
}

#[test]
fn stale_selection_is_pruned() {
    let (mut timeline, ids) = timeline_of(3);
    let mut selection = vec![ids[0].clone(), ids[1].clone()];
    timeline.delete_item(&ids[0]);
    timeline.retain_present(&mut selection);
    assert_eq!(selection, vec![ids[1].clone()]);
}

#[test]
fn patches_update_formula_and_group_fields() {
    let mut timeline = Timeline::new();
    let formula = timeline.insert(Step::apply_formula(CellCoord::new(1, 3), "=B2/C2"));
    let other = timeline.insert(Step::delete_column(0));

    assert!(timeline.update(
        &formula,
        &ItemPatch::formula(Some(CellCoord::new(2, 4)), Some("=B3*C3".into()))
    ));
    assert_matches!(
        timeline.get(&formula).unwrap(),
        TimelineItem::Step(Step { kind: StepKind::ApplyFormula { target, a1, formula }, .. })
            if *target == CellCoord::new(2, 4) && a1 == "E3" && formula == "=B3*C3"
    );

    let group = timeline.merge_selected(&[formula, other]).unwrap();
    timeline.update(&group, &ItemPatch::rename("Ratios"));
    timeline.update(&group, &ItemPatch::collapsed(true));
    timeline.update(&group, &ItemPatch::disabled(true));
    let group = timeline.get(&group).and_then(TimelineItem::as_group).unwrap();
    assert_eq!(group.name, "Ratios");
    assert!(group.collapsed);
    assert!(timeline.flatten_enabled().is_empty());

    assert!(!timeline.update(&ItemId::new_unchecked("missing"), &ItemPatch::disabled(true)));
}

#[test]
fn a1_patch_moves_the_formula_target() {
    let mut timeline = Timeline::new();
    let id = timeline.insert(Step::apply_formula(CellCoord::new(0, 0), "=1"));
    let patch = ItemPatch {
        a1: Some("C5".into()),
        ..Default::default()
    };
    timeline.update(&id, &patch);
    assert_matches!(
        timeline.get(&id).unwrap(),
        TimelineItem::Step(Step { kind: StepKind::ApplyFormula { target, a1, .. }, .. })
            if *target == CellCoord::new(4, 2) && a1 == "C5"
    );

    let bad = ItemPatch {
        a1: Some("nope".into()),
        ..Default::default()
    };
    timeline.update(&id, &bad);
    assert_matches!(
        timeline.get(&id).unwrap(),
        TimelineItem::Step(Step { kind: StepKind::ApplyFormula { a1, .. }, .. }) if a1 == "C5"
    );
}

#[test]
fn reorder_replaces_the_sequence() {
    let (mut timeline, ids) = timeline_of(3);
    let mut reversed = timeline.snapshot();
    reversed.reverse();
    timeline.reorder(reversed);
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(top_level_ids(&timeline), expected);
}

#[test]
fn loaded_items_get_fresh_ids() {
    let (source, _) = timeline_of(2);
    let mut target = Timeline::new();
    let loaded = target.load_items(&source.snapshot());
    assert_eq!(loaded.len(), 2);
    for id in &loaded {
        assert!(!source.contains(id));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_merge_conserves_steps(
        count in 2u32..12,
        picks in proptest::collection::vec(any::<bool>(), 12),
    ) {
        let (mut timeline, ids) = timeline_of(count);
        let selection: Vec<ItemId> = ids
            .iter()
            .zip(picks.iter())
            .filter(|(_, pick)| **pick)
            .map(|(id, _)| id.clone())
            .collect();

        let before = flat_ids(&timeline);
        let result = timeline.merge_selected(&selection);

        if selection.len() < 2 {
            prop_assert!(result.is_err());
        } else {
            let group_id = result.unwrap();
            prop_assert!(timeline.get(&group_id).is_some());
            prop_assert_eq!(timeline.len(), count as usize - selection.len() + 1);
        }
        prop_assert_eq!(timeline.step_count(), count as usize);

        let mut after = flat_ids(&timeline);
        let mut sorted_before = before.clone();
        after.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        sorted_before.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        prop_assert_eq!(after, sorted_before);
    }
}
