use crossgrid_bridge::prelude::*;
use proptest::prelude::*;

fn poly(raw: &[[f64; 2]], tags: impl Into<crossgrid_bridge::geometry::SegmentTags>) -> Contour {
    Contour::from_polyline(raw.iter().copied().map(Point2::from).collect(), tags).unwrap()
}

/// Unit square split into two triangles, every boundary edge tagged `tag`.
fn triangle_grid(tag: BoundaryTag) -> Mesh {
    let mut m = Mesh::from_cells(
        [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
            .into_iter()
            .map(Point2::from)
            .collect(),
        vec![vec![0, 1, 2], vec![0, 2, 3]],
    )
    .unwrap();
    for (e, _) in m.boundary_edges() {
        m.set_boundary_tag(e, tag);
    }
    m
}

#[test]
fn adjacent_square_picks_up_the_shared_edge() {
    let source = triangle_grid(5).boundary_contour().contour;
    assert_eq!(source.n_edges(), 4);
    let mut square = poly(
        &[[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0], [1.0, 0.0]],
        0,
    );
    setbc_from_conts(&mut square, [&source], 1e-8).unwrap();
    let tags: Vec<_> = (0..square.n_edges()).map(|e| square.edge_tag(e).unwrap()).collect();
    assert_eq!(tags, vec![0, 0, 0, 5]);
}

#[test]
fn united_grid_keeps_base_tags_on_surviving_edges() {
    let engine = ReferenceEngine::new();
    let overlay = Mesh::from_cells(
        [[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0]]
            .into_iter()
            .map(Point2::from)
            .collect(),
        vec![vec![0, 1, 2, 3]],
    )
    .unwrap();
    let mut ctx = OpContext::new(&engine);
    let united = unite_grids(&mut ctx, &triangle_grid(5), &overlay, &UniteOptions::default())
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(united.n_cells(), 3);
    let tagged: Vec<_> = united.boundary_tags().iter().collect();
    assert_eq!(tagged.len(), 3);
    assert!(tagged.iter().all(|&(_, t)| t == 5));
    // no tagged edge touches x = 2
    for (e, _) in tagged {
        let [a, b] = united.edges()[e];
        assert!(united.points()[a].x < 1.5 || united.points()[b].x < 1.5);
    }
}

#[test]
fn union_keeps_contour_tags_and_leaves_cut_edges_default() {
    use crossgrid_bridge::geometry::predicates::point_segment_distance;

    let outline = poly(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]], 5);
    let mut base = Mesh::from_cells(outline.points().to_vec(), vec![vec![0, 1, 2]]).unwrap();
    let mut boundary = base.boundary_contour();
    setbc_from_conts(&mut boundary.contour, [&outline], 1e-9).unwrap();
    base.set_boundary_tags_from(&boundary);
    assert_eq!(base.boundary_tags().len(), 3);

    let overlay = Mesh::from_cells(
        [[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0]]
            .into_iter()
            .map(Point2::from)
            .collect(),
        vec![vec![0, 1, 2, 3]],
    )
    .unwrap();
    let engine = ReferenceEngine::new();
    let mut ctx = OpContext::new(&engine);
    let united = unite_grids(&mut ctx, &base, &overlay, &UniteOptions::default())
        .unwrap()
        .completed()
        .unwrap();

    let on_outline = |p: Point2| outline.segments().any(|(a, b)| point_segment_distance(p, a, b) <= 1e-9);
    let (mut kept, mut cut) = (0, 0);
    for (e, [a, b]) in united.boundary_edges() {
        let (pa, pb) = (united.points()[a], united.points()[b]);
        let tag = united.boundary_tags().tag_or_default(e);
        if on_outline(pa) && on_outline(pb) {
            assert_eq!(tag, 5, "edge {e} lies on the outline");
            kept += 1;
        } else {
            assert_eq!(tag, DEFAULT_TAG, "edge {e} is new");
            cut += 1;
        }
    }
    assert_eq!((kept, cut), (2, 3));
    assert!(engine.ledger().is_balanced());
}

#[test]
fn untagged_inputs_leave_the_result_untagged() {
    let engine = ReferenceEngine::new();
    let mut ctx = OpContext::new(&engine);
    let cut = poly(
        &[[0.9, -1.0], [3.0, -1.0], [3.0, 2.0], [0.9, 2.0], [0.9, -1.0]],
        0,
    );
    let grid = Mesh::from_cells(
        [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]]
            .into_iter()
            .map(Point2::from)
            .collect(),
        vec![vec![0, 1, 4, 3], vec![1, 2, 5, 4]],
    )
    .unwrap();
    let out = grid_exclusion(&mut ctx, &grid, &cut, false).unwrap().completed().unwrap();
    assert_eq!(out.n_cells(), 1);
    assert!(out.boundary_tags().is_empty());
}

#[test]
fn later_source_wins_on_shared_edges() {
    let first = poly(&[[0.0, 0.0], [2.0, 0.0]], 1);
    let second = poly(&[[1.0, 0.0], [2.0, 0.0]], 2);
    let mut target = poly(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]], 0);
    setbc_from_conts(&mut target, [&first, &second], 1e-8).unwrap();
    assert_eq!(target.edge_tag(0), Some(1));
    assert_eq!(target.edge_tag(1), Some(2));

    setbc_from_conts(&mut target, [&second, &first], 1e-8).unwrap();
    assert_eq!(target.edge_tag(1), Some(1));
}

#[test]
fn default_tag_from_a_later_source_clears() {
    let tagged = poly(&[[0.0, 0.0], [1.0, 0.0]], 4);
    let untagged = poly(&[[0.0, 0.0], [1.0, 0.0]], 0);
    let mut target = poly(&[[0.0, 0.0], [1.0, 0.0]], 0);
    setbc_from_conts(&mut target, [&tagged, &untagged], 1e-8).unwrap();
    assert_eq!(target.edge_tag(0), Some(DEFAULT_TAG));
}

#[test]
fn unmatched_policy_controls_the_map() {
    let source = poly(&[[0.0, 0.0], [1.0, 0.0]], 3);
    let target = poly(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]], 0);
    let omit = propagate_tags(&source, &target, &TransferOptions::default()).unwrap();
    assert_eq!(omit.iter().collect::<Vec<_>>(), vec![(0, 3)]);
    let opts = TransferOptions {
        unmatched: UnmatchedPolicy::Default,
        ..Default::default()
    };
    let all = propagate_tags(&source, &target, &opts).unwrap();
    assert_eq!(all.iter().collect::<Vec<_>>(), vec![(0, 3), (1, DEFAULT_TAG)]);
}

proptest! {
    #[test]
    fn transfer_is_deterministic(
        tags in prop::collection::vec(0i32..6, 3..20),
        shift in -0.4f64..0.4,
    ) {
        let n = tags.len();
        let raw: Vec<[f64; 2]> = (0..=n).map(|i| [i as f64, 0.0]).collect();
        let source = poly(&raw, tags.clone());
        // target splits every source segment in two, then shifts along the line
        let split: Vec<[f64; 2]> = (0..=2 * n).map(|i| [i as f64 * 0.5 + shift, 0.0]).collect();
        let target = poly(&split, 0);
        let a = propagate_tags(&source, &target, &TransferOptions::default()).unwrap();
        let b = propagate_tags(&source, &target, &TransferOptions::default()).unwrap();
        prop_assert_eq!(&a, &b);
        // any half-segment fully inside source segment k carries tags[k]
        for (e, t) in a.iter() {
            let (p, q) = target.edge_segment(e);
            let lo = p.x.min(q.x);
            let k = lo.floor().max(0.0) as usize;
            let hi = p.x.max(q.x);
            if hi <= (k + 1) as f64 && k < n {
                prop_assert_eq!(t, tags[k]);
            }
        }
    }

    #[test]
    fn tolerance_bounds_matching(offset in 0.0f64..1e-3) {
        let source = poly(&[[0.0, 0.0], [1.0, 0.0]], 9);
        let target = poly(&[[0.0, offset], [1.0, offset]], 0);
        let tol = 5e-4;
        let tags = propagate_tags(&source, &target, &TransferOptions::with_tolerance(tol)).unwrap();
        prop_assert_eq!(tags.get(0) == Some(9), offset <= tol);
    }
}
