#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, GatingError, Result};
    use crate::types::{BooleanOperation, Dimension, Gate, GatePath, GateReference};

    fn path(s: &str) -> GatePath {
        s.parse().expect("valid path")
    }

    #[test]
    fn test_invalid_geometry_error() {
        let error = GatingError::invalid_geometry("poly", "Polygon needs at least 3 vertices");
        assert!(matches!(error, GatingError::InvalidGeometry { .. }));
        assert!(error.to_string().contains("Invalid geometry"));
        assert!(error.to_string().contains("poly"));
        assert!(error.to_string().contains("at least 3 vertices"));
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_channel_error() {
        let error = GatingError::unknown_channel("FSC-A", "gate 'R' in sample 's1'");
        assert!(error.to_string().contains("Unknown channel 'FSC-A'"));
        assert!(error.to_string().contains("gate 'R'"));
        assert_eq!(error.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_unknown_gate_mentions_path() {
        let bare = GatingError::unknown_gate("P", None);
        assert_eq!(bare.to_string(), "Gate 'P' not found");

        let at_path = GatingError::unknown_gate("P", Some(&path("/R/P")));
        assert_eq!(at_path.to_string(), "Gate 'P' not found at path '/R/P'");
    }

    #[test]
    fn test_ambiguous_gate_lists_paths() {
        let error = GatingError::AmbiguousGateId {
            gate_id: "live".into(),
            paths: vec![path("/a/live"), path("/b/live")],
        };
        let message = error.to_string();
        assert!(message.contains("'live' is ambiguous"));
        assert!(message.contains("/a/live, /b/live"));
        assert_eq!(error.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_cycle_is_dependency_kind() {
        let error = GatingError::CyclicGateDependency {
            gates: vec![path("/A"), path("/B")],
        };
        assert!(error.to_string().contains("/A, /B"));
        assert_eq!(error.kind(), ErrorKind::Dependency);
    }

    #[test]
    fn test_batch_errors_are_execution_kind() {
        let mismatch = GatingError::SampleMismatch {
            expected: "s1".into(),
            actual: "s2".into(),
        };
        let panic = GatingError::WorkerPanic {
            sample_id: "s1".into(),
            message: "boom".into(),
        };
        assert_eq!(mismatch.kind(), ErrorKind::Execution);
        assert_eq!(panic.kind(), ErrorKind::Execution);
        assert!(panic.to_string().contains("boom"));
    }

    #[test]
    fn test_with_context_keeps_source() {
        let error = GatingError::CyclicGateDependency { gates: vec![path("/A")] }
            .with_context("loading strategy.json");
        assert!(error.to_string().starts_with("loading strategy.json: "));
        let source = std::error::Error::source(&error).expect("wrapped error kept as source");
        assert!(source.to_string().contains("Cyclic"));

        let geometry = GatingError::invalid_geometry("g", "bad").with_context("ctx");
        assert!(matches!(geometry, GatingError::InvalidGeometry { ref message, .. } if message == "ctx: bad"));
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: std::result::Result<Gate, _> = serde_json::from_str("{ not json");
        let error: GatingError = parse.expect_err("invalid json").into();
        assert!(matches!(error, GatingError::SerializationError(_)));
        assert!(error.to_string().starts_with("Serialization error"));
    }

    #[test]
    fn test_anyhow_converts() {
        let error: GatingError = anyhow::anyhow!("upstream failure").into();
        assert!(matches!(error, GatingError::Other { .. }));
        assert_eq!(error.to_string(), "upstream failure");
    }

    #[test]
    fn test_rectangle_missing_bounds() {
        let gate = Gate::rectangle(
            "R",
            None,
            [Dimension::new("FSC-A").with_min(1.0), Dimension::new("SSC-A")],
        );
        let result: Result<()> = gate.validate();
        assert!(matches!(
            result,
            Err(GatingError::MissingBounds { ref channel, .. }) if channel.as_ref() == "SSC-A"
        ));
    }

    #[test]
    fn test_not_requires_one_operand() {
        let gate = Gate::boolean(
            "N",
            None,
            BooleanOperation::Not,
            vec![GateReference::new("A"), GateReference::new("B")],
        );
        let error = gate.validate().expect_err("two operands");
        assert!(matches!(error, GatingError::InvalidOperandCount { actual: 2, .. }));
        assert!(error.to_string().contains("'not' requires exactly 1"));
    }

    #[test]
    fn test_singular_covariance() {
        let gate = Gate::ellipsoid(
            "E",
            None,
            [Dimension::new("X"), Dimension::new("Y")],
            vec![0.0, 0.0],
            vec![vec![1.0, 1.0], vec![1.0, 1.0]],
            1.0,
        );
        assert!(matches!(
            gate.validate(),
            Err(GatingError::NonInvertibleCovariance { .. })
        ));
    }
}
