use crate::error::{GatingError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// Scalar transformation applied to a channel before gating
///
/// Parameter names follow the usual cytometry conventions: `t` is the top of
/// scale, `m` the number of positive decades, `a` additional negative decades
/// and `w` the linearization width of the logicle transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transform {
    /// `(x + a) / (t + a)`
    Linear { t: f64, a: f64 },
    /// `(1/m) · log10(x/t) + 1`
    ///
    /// Values `<= 0` map to `-inf` or `NaN` and fall outside every finite range.
    Log { t: f64, m: f64 },
    /// Parameterized inverse hyperbolic sine scaled to `[0, 1]` at `x = t`
    Asinh { t: f64, m: f64, a: f64 },
    /// Parks logicle (biexponential) transform
    Logicle { t: f64, w: f64, m: f64, a: f64 },
    /// `arcsinh(x / cofactor)`
    Arcsinh { cofactor: f64 },
}

/// Trait for types that can transform values from raw to gating scale
pub trait Transformable {
    fn transform(&self, value: f64) -> f64;
    fn inverse_transform(&self, value: f64) -> f64;

    /// Transform a whole column
    fn apply(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform(v)).collect()
    }
}

impl Transform {
    /// Check parameters are inside the domain of the transform
    pub fn validate(&self, transform_id: &str) -> Result<()> {
        let fail = |msg: &str| Err(GatingError::invalid_transform(transform_id, msg));
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());

        match *self {
            Transform::Linear { t, a } => {
                if !finite(&[t, a]) || t <= 0.0 {
                    return fail("linear requires finite parameters and t > 0");
                }
                if t + a == 0.0 {
                    return fail("linear requires t + a != 0");
                }
            }
            Transform::Log { t, m } => {
                if !finite(&[t, m]) || t <= 0.0 || m <= 0.0 {
                    return fail("log requires t > 0 and m > 0");
                }
            }
            Transform::Asinh { t, m, a } => {
                if !finite(&[t, m, a]) || t <= 0.0 || m <= 0.0 || a < 0.0 {
                    return fail("asinh requires t > 0, m > 0 and a >= 0");
                }
            }
            Transform::Logicle { t, w, m, a } => {
                if !finite(&[t, w, m, a]) || t <= 0.0 || m <= 0.0 || w < 0.0 {
                    return fail("logicle requires t > 0, m > 0 and w >= 0");
                }
                if 2.0 * w > m {
                    return fail("logicle requires w <= m / 2");
                }
                if a < -w || a > m - 2.0 * w {
                    return fail("logicle requires -w <= a <= m - 2w");
                }
            }
            Transform::Arcsinh { cofactor } => {
                if !cofactor.is_finite() || cofactor <= 0.0 {
                    return fail("arcsinh requires cofactor > 0");
                }
            }
        }
        Ok(())
    }
}

impl Transformable for Transform {
    fn transform(&self, value: f64) -> f64 {
        match *self {
            Transform::Linear { t, a } => (value + a) / (t + a),
            Transform::Log { t, m } => (value / t).log10() / m + 1.0,
            Transform::Asinh { t, m, a } => {
                let scaled = value * (m * LN_10).sinh() / t;
                (scaled.asinh() + a * LN_10) / ((m + a) * LN_10)
            }
            Transform::Logicle { t, w, m, a } => Logicle::new(t, w, m, a).scale(value),
            Transform::Arcsinh { cofactor } => (value / cofactor).asinh(),
        }
    }

    fn inverse_transform(&self, value: f64) -> f64 {
        match *self {
            Transform::Linear { t, a } => value * (t + a) - a,
            Transform::Log { t, m } => t * 10f64.powf((value - 1.0) * m),
            Transform::Asinh { t, m, a } => {
                let inner = value * (m + a) * LN_10 - a * LN_10;
                inner.sinh() * t / (m * LN_10).sinh()
            }
            Transform::Logicle { t, w, m, a } => Logicle::new(t, w, m, a).inverse(value),
            Transform::Arcsinh { cofactor } => value.sinh() * cofactor,
        }
    }

    fn apply(&self, values: &[f64]) -> Vec<f64> {
        match *self {
            // Solve the logicle constants once per column
            Transform::Logicle { t, w, m, a } => {
                let logicle = Logicle::new(t, w, m, a);
                values.iter().map(|&v| logicle.scale(v)).collect()
            }
            _ => values.iter().map(|&v| self.transform(v)).collect(),
        }
    }
}

/// Solved constants of the logicle biexponential
/// `B(y) = a·e^(b·y) - c·e^(-d·y) + f`, where `B(x1) = 0` and `B(1) = T`.
#[derive(Debug, Clone, Copy)]
struct Logicle {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    f: f64,
    x1: f64,
}

const BISECTION_ITERATIONS: usize = 200;

impl Logicle {
    fn new(t: f64, w: f64, m: f64, a_decades: f64) -> Self {
        let w_scaled = w / (m + a_decades);
        let x2 = a_decades / (m + a_decades);
        let x1 = x2 + w_scaled;
        let x0 = x2 + 2.0 * w_scaled;
        let b = (m + a_decades) * LN_10;
        let d = Self::solve_d(b, w_scaled);

        let c_a = (x0 * (b + d)).exp();
        let mf_a = (b * x1).exp() - c_a * (-d * x1).exp();
        let a = t / ((b.exp() - mf_a) - c_a * (-d).exp());

        Self {
            a,
            b,
            c: c_a * a,
            d,
            f: -mf_a * a,
            x1,
        }
    }

    /// Root of `2(ln d - ln b) + w(b + d) = 0` on `(0, b]`
    fn solve_d(b: f64, w: f64) -> f64 {
        if w == 0.0 {
            return b;
        }
        let g = |d: f64| 2.0 * (d.ln() - b.ln()) + w * (b + d);
        let (mut lo, mut hi) = (0.0_f64, b);
        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            if g(mid) > 0.0 {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        0.5 * (lo + hi)
    }

    #[inline]
    fn biexponential(&self, y: f64) -> f64 {
        self.a * (self.b * y).exp() - self.c * (-self.d * y).exp() + self.f
    }

    fn inverse(&self, y: f64) -> f64 {
        // Reflect about x1 so both branches share the positive solution
        if y < self.x1 {
            -self.biexponential(2.0 * self.x1 - y)
        } else {
            self.biexponential(y)
        }
    }

    fn scale(&self, value: f64) -> f64 {
        if value.is_nan() {
            return f64::NAN;
        }
        if value < 0.0 {
            return 2.0 * self.x1 - self.scale(-value);
        }
        if value == 0.0 {
            return self.x1;
        }

        let mut lo = self.x1;
        let mut hi = 1.0_f64.max(self.x1 + 1.0);
        while self.biexponential(hi) < value {
            lo = hi;
            hi *= 2.0;
            if !hi.is_finite() {
                return f64::INFINITY;
            }
        }

        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            if self.biexponential(mid) < value {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }
}
