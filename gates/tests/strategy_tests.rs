//! End-to-end gating strategy tests
//!
//! Each test builds a strategy through the public API (or from JSON), evaluates
//! it against small hand-checked samples and compares counts, percentages and
//! masks with values worked out by hand.
//!
//! Run with: `cargo test --test strategy_tests`

use approx::assert_relative_eq;
use flow_gating::*;

fn path(s: &str) -> GatePath {
    s.parse().expect("valid path")
}

/// X = [1, 2, 20, 3], Y = [6, 7, 8, 1]
fn xy_sample(id: &str) -> Sample {
    Sample::from_columns(
        id,
        vec![("X", vec![1.0, 2.0, 20.0, 3.0]), ("Y", vec![6.0, 7.0, 8.0, 1.0])],
    )
    .expect("valid sample")
}

/// R selects X < 10, P (child of R) selects Y >= 5
fn nested_strategy() -> GatingStrategy {
    let mut strategy = GatingStrategy::new();
    strategy
        .add_gate(Gate::rectangle("R", None, [Dimension::new("X").with_max(10.0)]), None)
        .expect("add R");
    strategy
        .add_gate(Gate::rectangle("P", Some("R"), [Dimension::new("Y").with_min(5.0)]), None)
        .expect("add P");
    strategy
}

#[test]
fn test_nested_rectangles_report() {
    let results = nested_strategy()
        .gate_sample(&xy_sample("s1"), false)
        .expect("evaluation");

    assert_eq!(results.get_count("R", None).expect("R"), 3);
    assert_eq!(results.get_count("P", None).expect("P"), 2);
    assert_relative_eq!(
        results.get_relative_percent("P", None).expect("P"),
        66.666_666,
        epsilon = 1e-3
    );
    assert_relative_eq!(results.get_absolute_percent("P", None).expect("P"), 50.0);

    // own mask includes event 2 (X = 20), the hierarchy mask does not
    assert_eq!(results.get_mask("P", None).expect("P"), &[true, true, true, false]);
    assert_eq!(
        results.get_hierarchy_mask("P", None).expect("P"),
        vec![true, true, false, false]
    );

    let rows = results.report().rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].gate_path, path("/R"));
    assert_eq!(rows[0].relative_percent, 75.0);
    assert_eq!(rows[1].parent, Some(path("/R")));
    assert_eq!(rows[1].level, 2);
    assert_eq!(rows[1].gate_type.as_ref(), "RectangleGate");
}

#[test]
fn test_reused_gate_id_under_different_parents() {
    let mut strategy = GatingStrategy::new();
    strategy
        .add_gate(Gate::rectangle("low", None, [Dimension::new("X").with_max(10.0)]), None)
        .expect("add");
    strategy
        .add_gate(Gate::rectangle("high", None, [Dimension::new("X").with_min(10.0)]), None)
        .expect("add");
    for parent in ["low", "high"] {
        strategy
            .add_gate(
                Gate::rectangle("bright", Some(parent), [Dimension::new("Y").with_min(5.0)]),
                None,
            )
            .expect("add");
    }

    let results = strategy.gate_sample(&xy_sample("s1"), false).expect("evaluation");

    assert!(matches!(
        results.get_count("bright", None),
        Err(GatingError::AmbiguousGateId { ref paths, .. }) if paths.len() == 2
    ));
    let low = path("/low/bright");
    let high = path("/high/bright");
    assert_eq!(results.get_count("bright", Some(&low)).expect("low"), 2);
    assert_eq!(results.get_count("bright", Some(&high)).expect("high"), 1);
    assert_relative_eq!(results.get_relative_percent("bright", Some(&high)).expect("high"), 100.0);
}

#[test]
fn test_quadrant_gate_splits_parent() {
    let mut strategy = GatingStrategy::new();
    strategy
        .add_gate(
            Gate::quadrant(
                "Q",
                None,
                vec![
                    Divider::new("dx", Dimension::new("X"), vec![5.0]),
                    Divider::new("dy", Dimension::new("Y"), vec![5.0]),
                ],
                vec![
                    Quadrant::new("LL").with_position("dx", 0.0).with_position("dy", 0.0),
                    Quadrant::new("LH").with_position("dx", 0.0).with_position("dy", 10.0),
                    Quadrant::new("HL").with_position("dx", 10.0).with_position("dy", 0.0),
                    Quadrant::new("HH").with_position("dx", 10.0).with_position("dy", 10.0),
                ],
            ),
            None,
        )
        .expect("add Q");
    strategy
        .add_gate(Gate::rectangle("HH_bright", Some("HH"), [Dimension::new("Y").with_min(9.0)]), None)
        .expect("add child of quadrant");

    let sample = Sample::from_columns(
        "s1",
        vec![
            ("X", vec![1.0, 1.0, 9.0, 9.0, 5.0]),
            ("Y", vec![1.0, 9.0, 1.0, 9.0, 5.0]),
        ],
    )
    .expect("sample");
    let results = strategy.gate_sample(&sample, false).expect("evaluation");

    let counts: Vec<usize> = ["LL", "LH", "HL", "HH"]
        .iter()
        .map(|q| results.get_count(q, None).expect("quadrant"))
        .collect();
    // a point on the divider belongs to the upper quadrant
    assert_eq!(counts, vec![1, 1, 1, 2]);
    assert_eq!(counts.iter().sum::<usize>(), 5);

    assert_eq!(results.get_count("HH_bright", None).expect("child"), 1);
    assert_relative_eq!(results.get_relative_percent("HH_bright", None).expect("child"), 50.0);

    let hh = results.report().find("s1", &path("/HH")).expect("HH row");
    assert_eq!(hh.quadrant_parent.as_deref(), Some("Q"));
    assert!(matches!(results.get_count("Q", None), Err(GatingError::UnknownGate { .. })));
}

#[test]
fn test_targeting_a_quadrant_evaluates_its_gate() {
    let mut strategy = nested_strategy();
    strategy
        .add_gate(
            Gate::quadrant(
                "Q",
                Some("R"),
                vec![Divider::new("d", Dimension::new("X"), vec![2.0])],
                vec![
                    Quadrant::new("dim").with_position("d", 0.0),
                    Quadrant::new("bright").with_position("d", 5.0),
                ],
            ),
            None,
        )
        .expect("add Q");

    let results = evaluate(&strategy, &xy_sample("s1"), Some("bright"), None).expect("evaluation");
    let paths: Vec<String> = results.gate_paths().map(|p| p.to_string()).collect();
    assert_eq!(paths, vec!["/R", "/R/dim", "/R/bright"]);
    // X = 2 and X = 3 inside R
    assert_eq!(results.get_count("bright", None).expect("bright"), 2);
    assert!(results.get_count("P", None).is_err());
}

#[test]
fn test_boolean_gate_with_complement() {
    let mut strategy = GatingStrategy::new();
    strategy
        .add_gate(Gate::rectangle("R", None, [Dimension::new("X").with_max(10.0)]), None)
        .expect("add");
    strategy
        .add_gate(Gate::rectangle("P", None, [Dimension::new("Y").with_min(5.0)]), None)
        .expect("add");
    strategy
        .add_gate(
            Gate::boolean(
                "R_not_P",
                None,
                BooleanOperation::And,
                vec![GateReference::new("R"), GateReference::new("P").complemented()],
            ),
            None,
        )
        .expect("add");
    strategy
        .add_gate(
            Gate::boolean(
                "R_or_P",
                None,
                BooleanOperation::Or,
                vec![GateReference::new("R"), GateReference::new("P")],
            ),
            None,
        )
        .expect("add");

    let results = strategy.gate_sample(&xy_sample("s1"), false).expect("evaluation");
    assert_eq!(results.get_mask("R_not_P", None).expect("and"), &[false, false, false, true]);
    assert_eq!(results.get_count("R_or_P", None).expect("or"), 4);
    assert_eq!(
        results.report().find("s1", &path("/R_not_P")).map(|r| r.gate_type.to_string()),
        Some("BooleanGate".to_string())
    );
}

#[test]
fn test_boolean_cycle_fails_evaluation() {
    let mut strategy = GatingStrategy::new();
    strategy
        .add_gate(
            Gate::boolean("A", None, BooleanOperation::Not, vec![GateReference::new("B")]),
            None,
        )
        .expect("add A");
    strategy
        .add_gate(
            Gate::boolean("B", None, BooleanOperation::Not, vec![GateReference::new("A")]),
            None,
        )
        .expect("add B");

    let err = strategy
        .gate_sample(&xy_sample("s1"), false)
        .expect_err("cycle must fail");
    assert_eq!(err.kind(), ErrorKind::Dependency);
}

#[test]
fn test_polygon_and_ellipsoid_gates() {
    let mut strategy = GatingStrategy::new();
    strategy
        .add_gate(
            Gate::polygon(
                "square",
                None,
                [Dimension::new("X"), Dimension::new("Y")],
                vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)],
            ),
            None,
        )
        .expect("add polygon");
    strategy
        .add_gate(
            Gate::ellipsoid(
                "disc",
                None,
                [Dimension::new("X"), Dimension::new("Y")],
                vec![0.0, 0.0],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                1.0,
            ),
            None,
        )
        .expect("add ellipsoid");

    let sample = Sample::from_columns(
        "s1",
        vec![
            ("X", vec![0.0, 0.5, 1.0, 2.0, 5.0, 15.0]),
            ("Y", vec![0.0, 0.5, 0.0, 0.0, 5.0, 5.0]),
        ],
    )
    .expect("sample");
    let results = strategy.gate_sample(&sample, false).expect("evaluation");

    assert_eq!(
        results.get_mask("disc", None).expect("disc"),
        &[true, true, true, false, false, false]
    );
    assert_eq!(&results.get_mask("square", None).expect("square")[4..], &[true, false]);
}

#[test]
fn test_strategy_from_json() {
    let strategy_json = r#"{
        "gates": [
            {
                "id": "P",
                "parent": "R",
                "type": "Rectangle",
                "dimensions": [{ "channel": "Y", "min": 5.0 }]
            },
            {
                "id": "R",
                "type": "Rectangle",
                "dimensions": [
                    { "channel": "X", "compensation_ref": "spill", "transform_ref": "lin", "max": 0.1 }
                ]
            }
        ],
        "transforms": { "lin": { "type": "linear", "t": 100.0, "a": 0.0 } },
        "comp_matrices": [
            { "id": "spill", "detectors": ["X"], "spillover": [[1.0]] }
        ]
    }"#;
    let sample_json = r#"{
        "id": "s1",
        "channel_labels": ["X", "Y"],
        "events": [[1.0, 6.0], [2.0, 7.0], [20.0, 8.0], [3.0, 1.0]]
    }"#;

    let definition: StrategyDefinition = serde_json::from_str(strategy_json).expect("strategy json");
    let strategy = GatingStrategy::from_definition(definition).expect("strategy");
    let sample: Sample = serde_json::from_str(sample_json).expect("sample json");

    let results = strategy.gate_sample(&sample, false).expect("evaluation");
    assert_eq!(results.get_count("R", None).expect("R"), 3);
    assert_eq!(results.get_count("P", None).expect("P"), 2);
    assert_eq!(strategy.hierarchy_ascii(), "root\n╰── R\n    ╰── P\n");
}

#[test]
fn test_batch_matches_sequential_and_isolates_failures() {
    let template = nested_strategy();
    let build_units = || {
        vec![
            (template.for_sample("s1"), xy_sample("s1")),
            (
                template.for_sample("broken"),
                Sample::from_columns("broken", vec![("X", vec![1.0])]).expect("sample"),
            ),
            (template.for_sample("s3"), xy_sample("s3")),
        ]
    };

    let sequential = evaluate_batch_with(
        build_units(),
        &BatchOptions {
            parallelism: Parallelism::Disabled,
            ..Default::default()
        },
    );
    let parallel = evaluate_batch_with(
        build_units(),
        &BatchOptionsBuilder::default()
            .parallelism(Parallelism::MaxWorkers(3))
            .build()
            .expect("options"),
    );

    for batch in [&sequential, &parallel] {
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.failed_sample_ids(), vec!["broken"]);
        assert!(matches!(
            batch.get("broken"),
            Some(Err(GatingError::UnknownChannel { .. }))
        ));
        assert_eq!(batch.successes().count(), 2);
    }
    assert_eq!(sequential.report(), parallel.report());
    for (seq, par) in sequential.successes().zip(parallel.successes()) {
        assert_eq!(seq.sample_id(), par.sample_id());
        assert!(seq.gate_paths().eq(par.gate_paths()));
        for gate_path in seq.gate_paths() {
            let id = gate_path.gate_id();
            assert_eq!(
                seq.get_mask(id, Some(gate_path)).expect("mask"),
                par.get_mask(id, Some(gate_path)).expect("mask")
            );
        }
    }

    let report = parallel.report();
    assert_eq!(report.rows_for_sample("s3").count(), 2);
    assert_eq!(report.find("s3", &path("/R/P")).map(|r| r.count), Some(2));
}

#[test]
fn test_default_batch_entry_point() {
    let template = nested_strategy();
    let units: Vec<_> = (0..4)
        .map(|i| {
            let id = format!("s{i}");
            (template.for_sample(id.as_str()), xy_sample(&id))
        })
        .collect();

    let batch = evaluate_batch(units, false);
    let ids: Vec<&str> = batch.outcomes().iter().map(|o| o.sample_id.as_ref()).collect();
    assert_eq!(ids, vec!["s0", "s1", "s2", "s3"]);
    assert!(batch.failures().next().is_none());
}

#[test]
fn test_batch_with_target_gate() {
    let template = nested_strategy();
    let units = vec![
        (template.for_sample("s1"), xy_sample("s1")),
        (template.for_sample("s2"), xy_sample("s2")),
    ];
    let options = BatchOptionsBuilder::default()
        .gate_id("R")
        .build()
        .expect("options");

    let batch = evaluate_batch_with(units, &options);
    let report = batch.report();
    assert_eq!(report.len(), 2);
    assert!(report.rows().iter().all(|r| r.gate_path == path("/R")));
}
