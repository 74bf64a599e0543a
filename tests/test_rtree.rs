use rtree_index::{RTree, RTreeError, Rectangle};
use std::time::Duration;
use tracing::{debug, info};

fn r(x1: i64, y1: i64, x2: i64, y2: i64) -> Rectangle {
    Rectangle::from_corners(x1, y1, x2, y2)
}

#[test]
fn scenario_one_two_point_index() {
    info!("Starting scenario 1: two-point index");
    let tree = RTree::with_capacity(4, 2).unwrap();
    tree.add(r(0, 0, 10, 10), "A").unwrap();
    tree.add(r(20, 20, 30, 30), "B").unwrap();
    debug!("Inserted A and B");

    assert_eq!(tree.count().unwrap(), 2);

    let mut hit = tree.intersects(r(5, 5, 25, 25)).unwrap();
    hit.sort();
    assert_eq!(hit, vec!["A", "B"]);

    let mut contained = tree.contains(r(0, 0, 30, 30)).unwrap();
    contained.sort();
    assert_eq!(contained, vec!["A", "B"]);

    assert_eq!(tree.bounds().unwrap(), Some(r(0, 0, 30, 30)));
    info!("Scenario 1 completed successfully");
}

fn build_five_rectangle_index() -> RTree<&'static str> {
    let tree = RTree::with_capacity(4, 2).unwrap();
    let entries = [
        (r(0, 0, 1, 1), "A"),
        (r(2, 2, 3, 3), "B"),
        (r(4, 4, 5, 5), "C"),
        (r(6, 6, 7, 7), "D"),
        (r(8, 8, 9, 9), "E"),
    ];
    for (rect, label) in entries {
        tree.add(rect, label).unwrap();
        debug!(label, "inserted rectangle");
    }
    tree
}

#[test]
fn scenario_two_five_point_index_queries() {
    info!("Starting scenario 2: five-point index range queries");
    let tree = build_five_rectangle_index();

    let mut hit = tree.intersects(r(3, 3, 7, 7)).unwrap();
    hit.sort();
    assert_eq!(hit, vec!["B", "C", "D"]);

    let mut contained = tree.contains(r(1, 1, 6, 6)).unwrap();
    contained.sort();
    assert_eq!(contained, vec!["B", "C"]);
    info!("Scenario 2 completed successfully");
}

#[test]
fn scenario_three_nearest_with_radius_bound() {
    info!("Starting scenario 3: bounded nearest-neighbor search");
    let tree = build_five_rectangle_index();

    let point = rtree_index::Point::new(10, 10);
    assert_eq!(tree.nearest(point, 3.0).unwrap(), vec!["E"]);
    assert!(tree.nearest(point, 1.0).unwrap().is_empty());
    info!("Scenario 3 completed successfully");
}

#[test]
fn scenario_four_delete_then_requery() {
    info!("Starting scenario 4: delete then requery");
    let tree = build_five_rectangle_index();

    assert!(tree.delete(r(2, 2, 3, 3), &"B").unwrap());
    assert!(tree.intersects(r(2, 2, 3, 3)).unwrap().is_empty());
    assert_eq!(tree.count().unwrap(), 4);
    info!("Scenario 4 completed successfully");
}

#[test]
fn scenario_five_duplicate_payload_is_rejected() {
    info!("Starting scenario 5: duplicate payload insertion");
    let tree = RTree::with_capacity(4, 2).unwrap();
    tree.add(r(0, 0, 1, 1), "A").unwrap();

    let err = tree.add(r(5, 5, 6, 6), "A").unwrap_err();
    assert!(matches!(err, RTreeError::DuplicatePayload));
    assert_eq!(tree.count().unwrap(), 1);
    info!("Scenario 5 completed successfully");
}

#[test]
fn scenario_six_delete_never_inserted_payload_is_not_found() {
    info!("Starting scenario 6: delete of an unknown payload");
    let tree: RTree<&str> = RTree::with_capacity(4, 2).unwrap();
    let err = tree.delete(r(0, 0, 1, 1), &"ghost").unwrap_err();
    assert!(matches!(err, RTreeError::NotFound));
    info!("Scenario 6 completed successfully");
}

#[test]
fn add_then_delete_restores_prior_query_results() {
    info!("Starting round-trip add/delete check");
    let tree = build_five_rectangle_index();
    let before = {
        let mut hit = tree.intersects(r(-100, -100, 100, 100)).unwrap();
        hit.sort();
        hit
    };

    tree.add(r(50, 50, 51, 51), "Z").unwrap();
    tree.delete(r(50, 50, 51, 51), &"Z").unwrap();

    let mut after = tree.intersects(r(-100, -100, 100, 100)).unwrap();
    after.sort();
    assert_eq!(before, after);
    info!("Round-trip add/delete check completed successfully");
}

#[test]
fn construction_rejects_invalid_fanout_parameters() {
    assert!(matches!(
        RTree::<i32>::with_capacity(1, 1).unwrap_err(),
        RTreeError::InvalidArgument { .. }
    ));
    assert!(matches!(
        RTree::<i32>::with_capacity(4, 3).unwrap_err(),
        RTreeError::InvalidArgument { .. }
    ));
}

#[test]
fn custom_lock_timeout_does_not_interfere_with_uncontended_access() {
    info!("Starting custom lock-timeout smoke check");
    let tree = RTree::with_capacity_and_timeout(4, 2, Duration::from_millis(20)).unwrap();
    tree.add(r(0, 0, 1, 1), "A").unwrap();
    assert_eq!(tree.intersects(r(0, 0, 1, 1)).unwrap(), vec!["A"]);
    info!("Custom lock-timeout smoke check completed successfully");
}
