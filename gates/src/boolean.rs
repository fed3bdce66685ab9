use crate::error::{GatingError, Result};
use crate::types::{BooleanOperation, GateReference};

/// Check operand count for a boolean operation
pub(crate) fn validate(
    gate_id: &str,
    operation: BooleanOperation,
    operands: &[GateReference],
) -> Result<()> {
    let (ok, expected) = match operation {
        BooleanOperation::And | BooleanOperation::Or => (!operands.is_empty(), "at least 1"),
        BooleanOperation::Not => (operands.len() == 1, "exactly 1"),
    };
    if ok {
        Ok(())
    } else {
        Err(GatingError::InvalidOperandCount {
            gate_id: gate_id.into(),
            operation,
            expected,
            actual: operands.len(),
        })
    }
}

/// Combine resolved operand masks.
///
/// Each operand is paired with its complement flag. `Not` inverts its single
/// operand after any complement has been applied.
pub fn combine(operation: BooleanOperation, operands: &[(&[bool], bool)], n_events: usize) -> Vec<bool> {
    let value = |(mask, complement): &(&[bool], bool), i: usize| mask[i] != *complement;

    match operation {
        BooleanOperation::And => (0..n_events)
            .map(|i| operands.iter().all(|op| value(op, i)))
            .collect(),
        BooleanOperation::Or => (0..n_events)
            .map(|i| operands.iter().any(|op| value(op, i)))
            .collect(),
        BooleanOperation::Not => match operands.first() {
            Some(op) => (0..n_events).map(|i| !value(op, i)).collect(),
            None => vec![true; n_events],
        },
    }
}
