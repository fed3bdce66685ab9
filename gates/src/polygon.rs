use crate::error::{GatingError, Result};
use crate::types::Dimension;

/// Check dimension and vertex counts of a polygon gate
pub(crate) fn validate(gate_id: &str, dimensions: &[Dimension], vertices: &[(f64, f64)]) -> Result<()> {
    if dimensions.len() != 2 {
        return Err(GatingError::invalid_geometry(
            gate_id,
            format!(
                "Polygon gate requires exactly 2 dimensions, got {}",
                dimensions.len()
            ),
        ));
    }
    if vertices.len() < 3 {
        return Err(GatingError::invalid_geometry(
            gate_id,
            format!(
                "Polygon gate requires at least 3 vertices, got {}",
                vertices.len()
            ),
        ));
    }
    if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(GatingError::invalid_geometry(
            gate_id,
            "Polygon vertices must be finite",
        ));
    }
    Ok(())
}

/// Twice the signed area of triangle (a, b, p); positive when p lies left of a→b
#[inline]
fn is_left(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> f64 {
    (b.0 - a.0) * (p.1 - a.1) - (p.0 - a.0) * (b.1 - a.1)
}

/// Winding number of `polygon` around `(x, y)`.
///
/// Each edge is evaluated with its endpoints ordered by y, so the crossing test
/// for an edge does not depend on the direction it is traversed in. Only the
/// sign of the contribution follows the traversal direction. Rotating the
/// vertex list leaves the result unchanged and reversing it only flips the sign.
/// Horizontal edges never contribute. An edge is crossed when
/// `lo.y <= y < hi.y` and the point is strictly left of the upward edge.
pub fn winding_number(x: f64, y: f64, polygon: &[(f64, f64)]) -> i32 {
    let n = polygon.len();
    let p = (x, y);
    let mut wn = 0;

    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        if a.1 == b.1 {
            continue;
        }

        let upward = a.1 < b.1;
        let (lo, hi) = if upward { (a, b) } else { (b, a) };
        if lo.1 <= y && y < hi.1 && is_left(lo, hi, p) > 0.0 {
            wn += if upward { 1 } else { -1 };
        }
    }

    wn
}

/// Point-in-polygon by the non-zero winding rule
#[inline]
pub fn point_in_polygon(x: f64, y: f64, polygon: &[(f64, f64)]) -> bool {
    winding_number(x, y, polygon) != 0
}

/// Membership mask for a polygon over two resolved columns
pub fn polygon_mask(vertices: &[(f64, f64)], xs: &[f64], ys: &[f64]) -> Vec<bool> {
    let (min_x, min_y, max_x, max_y) = bounding_box(vertices);

    xs.iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            // Quick rejection; the winding test would give zero outside the box anyway
            if !(x >= min_x && x <= max_x && y >= min_y && y <= max_y) {
                return false;
            }
            point_in_polygon(x, y, vertices)
        })
        .collect()
}

fn bounding_box(vertices: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    vertices.iter().fold(
        (
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        ),
        |(min_x, min_y, max_x, max_y), &(x, y)| {
            (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
    }

    #[test]
    fn test_square_interior_and_exterior() {
        let poly = square();
        assert!(point_in_polygon(5.0, 5.0, &poly));
        assert!(!point_in_polygon(15.0, 5.0, &poly));
        assert!(!point_in_polygon(-1.0, 5.0, &poly));
        assert!(!point_in_polygon(5.0, 10.5, &poly));
    }

    #[test]
    fn test_winding_sign_follows_orientation() {
        let mut poly = square();
        assert_eq!(winding_number(5.0, 5.0, &poly), 1);
        poly.reverse();
        assert_eq!(winding_number(5.0, 5.0, &poly), -1);
    }

    #[test]
    fn test_self_overlapping_polygon_uses_nonzero_rule() {
        // Pentagram: the centre has winding number 2 and is inside under non-zero
        let star = vec![
            (0.0, 10.0),
            (5.878, -8.09),
            (-9.511, 3.09),
            (9.511, 3.09),
            (-5.878, -8.09),
        ];
        assert_eq!(winding_number(0.0, 0.0, &star).abs(), 2);
        assert!(point_in_polygon(0.0, 0.0, &star));
    }

    #[test]
    fn test_boundary_points_independent_of_vertex_order() {
        let poly = square();
        let probes = [
            (0.0, 5.0),
            (10.0, 5.0),
            (5.0, 0.0),
            (5.0, 10.0),
            (0.0, 0.0),
            (10.0, 10.0),
        ];
        for (x, y) in probes {
            let expected = point_in_polygon(x, y, &poly);
            for shift in 0..poly.len() {
                let mut rotated = poly.clone();
                rotated.rotate_left(shift);
                assert_eq!(point_in_polygon(x, y, &rotated), expected);
                rotated.reverse();
                assert_eq!(point_in_polygon(x, y, &rotated), expected);
            }
        }
    }

    #[test]
    fn test_triangle_mask() {
        let triangle = vec![(0.0, 0.0), (10.0, 0.0), (5.0, 10.0)];
        let xs = [5.0, 15.0, 5.0, 5.0];
        let ys = [5.0, 5.0, 5.0, 50.0];
        assert_eq!(polygon_mask(&triangle, &xs, &ys), vec![true, false, true, false]);
    }

    #[test]
    fn test_validate() {
        let dims = [Dimension::new("X"), Dimension::new("Y")];
        assert!(validate("P", &dims, &square()).is_ok());
        assert!(validate("P", &dims, &square()[..2]).is_err());
        assert!(validate("P", &dims[..1], &square()).is_err());
        assert!(validate("P", &dims, &[(0.0, 0.0), (f64::NAN, 1.0), (1.0, 1.0)]).is_err());
    }
}
