// Gap filling over row index for partially known columns.

use super::AlignError;

/// Running sum over the known entries; gaps stay `None` and do not reset the total.
pub fn cumulative_with_gaps(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut total = 0.0;
    values
        .iter()
        .map(|v| {
            v.map(|x| {
                total += x;
                total
            })
        })
        .collect()
}

/// Fill gaps by straight lines between neighbouring known rows.
///
/// Rows before the first or after the last known row hold the nearest known value.
pub fn fill_linear(values: &[Option<f64>]) -> Result<Vec<f64>, AlignError> {
    if let Some(dense) = without_gaps(values) {
        return Ok(dense);
    }
    let (xs, ys) = known_points(values)?;
    let mut out = Vec::with_capacity(values.len());
    let mut seg = 0usize;
    for (row, value) in values.iter().enumerate() {
        if let Some(v) = value {
            out.push(*v);
            continue;
        }
        let x = row as f64;
        while seg + 2 < xs.len() && xs[seg + 1] < x {
            seg += 1;
        }
        let (x0, y0) = (xs[seg], ys[seg]);
        let (x1, y1) = (xs[seg + 1], ys[seg + 1]);
        if x <= x0 {
            out.push(y0);
        } else if x >= x1 {
            out.push(y1);
        } else {
            out.push(y0 + (x - x0) * (y1 - y0) / (x1 - x0));
        }
    }
    Ok(out)
}

/// Fill gaps with a natural cubic spline through the known rows.
///
/// Rows before the first or after the last known row hold the nearest known value.
pub fn fill_natural_cubic(values: &[Option<f64>]) -> Result<Vec<f64>, AlignError> {
    if let Some(dense) = without_gaps(values) {
        return Ok(dense);
    }
    let (xs, ys) = known_points(values)?;
    let spline = NaturalCubicSpline::new(&xs, &ys)?;
    Ok(values
        .iter()
        .enumerate()
        .map(|(row, value)| value.unwrap_or_else(|| spline.evaluate(row as f64)))
        .collect())
}

fn without_gaps(values: &[Option<f64>]) -> Option<Vec<f64>> {
    values.iter().copied().collect()
}

fn known_points(values: &[Option<f64>]) -> Result<(Vec<f64>, Vec<f64>), AlignError> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = values
        .iter()
        .enumerate()
        .filter_map(|(row, v)| v.map(|y| (row as f64, y)))
        .unzip();
    if xs.len() < 2 {
        return Err(AlignError::InsufficientDataForInterpolation {
            required: 2,
            available: xs.len(),
        });
    }
    Ok((xs, ys))
}

/// Cubic spline with zero second derivative at both end knots.
#[derive(Clone, Debug)]
pub struct NaturalCubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    second: Vec<f64>,
}

impl NaturalCubicSpline {
    /// Knots must be strictly increasing in `x`; two knots give a straight line.
    pub fn new(xs: &[f64], ys: &[f64]) -> Result<Self, AlignError> {
        if xs.len() != ys.len() {
            return Err(AlignError::InvalidMapping(format!(
                "spline knots mismatch: {} x vs {} y",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(AlignError::InsufficientDataForInterpolation {
                required: 2,
                available: xs.len(),
            });
        }
        if xs.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AlignError::InvalidMapping(
                "spline knots must be strictly increasing".into(),
            ));
        }

        let n = xs.len();
        let mut second = vec![0.0; n];
        if n > 2 {
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            // Tridiagonal solve (Thomas) for the interior second derivatives.
            let interior = n - 2;
            let mut c_prime = vec![0.0; interior];
            let mut d_prime = vec![0.0; interior];
            for k in 0..interior {
                let i = k + 1;
                let diag = 2.0 * (h[i - 1] + h[i]);
                let rhs = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
                if k == 0 {
                    c_prime[k] = h[i] / diag;
                    d_prime[k] = rhs / diag;
                } else {
                    let denom = diag - h[i - 1] * c_prime[k - 1];
                    c_prime[k] = h[i] / denom;
                    d_prime[k] = (rhs - h[i - 1] * d_prime[k - 1]) / denom;
                }
            }
            second[interior] = d_prime[interior - 1];
            for k in (0..interior - 1).rev() {
                second[k + 1] = d_prime[k] - c_prime[k] * second[k + 2];
            }
        }

        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            second,
        })
    }

    /// Evaluate at `x`, clamped to the knot range.
    pub fn evaluate(&self, x: f64) -> f64 {
        let last = self.xs.len() - 1;
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[last] {
            return self.ys[last];
        }
        let i = self.xs.partition_point(|&xi| xi <= x).saturating_sub(1).min(last - 1);
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let h = x1 - x0;
        let a = (x1 - x) / h;
        let b = (x - x0) / h;
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a * a * a - a) * self.second[i] + (b * b * b - b) * self.second[i + 1]) * h * h
                / 6.0
    }

    pub fn second_derivatives(&self) -> &[f64] {
        &self.second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative_preserves_gaps() {
        let cum = cumulative_with_gaps(&[Some(0.0), None, Some(0.01), None, Some(-0.02)]);
        assert_eq!(cum[0], Some(0.0));
        assert_eq!(cum[1], None);
        assert!((cum[2].unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(cum[3], None);
        assert!((cum[4].unwrap() + 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_linear_straight_line_between_known_rows() {
        let (vi, vj) = (0.5, 2.0);
        let (i, j) = (2usize, 7usize);
        let mut values = vec![None; 10];
        values[0] = Some(0.0);
        values[i] = Some(vi);
        values[j] = Some(vj);
        values[9] = Some(1.0);
        let filled = fill_linear(&values).unwrap();
        for t in 0..=(j - i) {
            let expected = vi + t as f64 * (vj - vi) / (j - i) as f64;
            assert!((filled[i + t] - expected).abs() < 1e-12, "t={t}");
        }
        assert!((filled[8] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_linear_holds_edges() {
        let filled = fill_linear(&[None, Some(1.0), None, Some(3.0), None]).unwrap();
        assert_eq!(filled, vec![1.0, 1.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_fill_requires_two_known_points() {
        assert!(matches!(
            fill_linear(&[None, Some(1.0), None]),
            Err(AlignError::InsufficientDataForInterpolation { required: 2, available: 1 })
        ));
        assert!(matches!(
            fill_natural_cubic(&[None, None]),
            Err(AlignError::InsufficientDataForInterpolation { required: 2, available: 0 })
        ));
    }

    #[test]
    fn test_fill_without_gaps_is_passthrough() {
        let values = [Some(0.3)];
        assert_eq!(fill_linear(&values).unwrap(), vec![0.3]);
        assert_eq!(fill_natural_cubic(&values).unwrap(), vec![0.3]);
    }

    #[test]
    fn test_spline_three_knot_value() {
        let spline = NaturalCubicSpline::new(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]).unwrap();
        assert!((spline.second_derivatives()[1] + 3.0).abs() < 1e-12);
        assert!((spline.evaluate(0.5) - 0.6875).abs() < 1e-12);
        assert!((spline.evaluate(1.5) - 0.6875).abs() < 1e-12);
    }

    #[test]
    fn test_spline_reproduces_straight_line() {
        let xs = [0.0, 2.0, 3.0, 7.0, 10.0];
        let ys: Vec<f64> = xs.iter().map(|x| 0.25 * x - 1.0).collect();
        let spline = NaturalCubicSpline::new(&xs, &ys).unwrap();
        for s in spline.second_derivatives() {
            assert!(s.abs() < 1e-12);
        }
        for step in 0..=20 {
            let x = step as f64 * 0.5;
            assert!((spline.evaluate(x) - (0.25 * x - 1.0)).abs() < 1e-12, "x={x}");
        }
    }

    #[test]
    fn test_spline_natural_ends_and_continuity() {
        let xs = [0.0, 1.0, 3.0, 4.0, 6.0];
        let ys = [0.0, 0.8, -0.3, 0.4, 1.0];
        let spline = NaturalCubicSpline::new(&xs, &ys).unwrap();
        let m = spline.second_derivatives();
        assert_eq!(m[0], 0.0);
        assert_eq!(m[4], 0.0);
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((spline.evaluate(*x) - y).abs() < 1e-12);
        }
        // First derivative is continuous across interior knots.
        let eps = 1e-6;
        for &knot in &xs[1..4] {
            let left = (spline.evaluate(knot) - spline.evaluate(knot - eps)) / eps;
            let right = (spline.evaluate(knot + eps) - spline.evaluate(knot)) / eps;
            assert!((left - right).abs() < 1e-4, "knot={knot}");
        }
    }

    #[test]
    fn test_spline_rejects_unsorted_knots() {
        assert!(NaturalCubicSpline::new(&[0.0, 2.0, 1.0], &[0.0, 1.0, 2.0]).is_err());
    }

    #[test]
    fn test_cubic_fill_keeps_known_rows() {
        let values = [Some(0.0), None, Some(0.02), None, None, Some(0.01)];
        let filled = fill_natural_cubic(&values).unwrap();
        assert_eq!(filled[0], 0.0);
        assert_eq!(filled[2], 0.02);
        assert_eq!(filled[5], 0.01);
        assert!(filled.iter().all(|v| v.is_finite()));
    }
}
