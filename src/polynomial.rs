//! Least-squares reference curve fitting.

use log::debug;
use nalgebra::{DMatrix, DVector, Point2};

use crate::error::MpcError;

/// `f(x) = c0 + c1·x + ... + cn·x^n`, coefficients in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePolynomial {
    coeffs: DVector<f64>,
}

impl ReferencePolynomial {
    pub fn new(coeffs: DVector<f64>) -> Self {
        Self { coeffs }
    }

    pub fn from_slice(coeffs: &[f64]) -> Self {
        Self::new(DVector::from_column_slice(coeffs))
    }

    /// Fits a polynomial of `degree` through `points` by QR decomposition of
    /// the Vandermonde design matrix.
    pub fn fit(points: &[Point2<f64>], degree: usize) -> Result<Self, MpcError> {
        let required = degree + 1;
        if points.len() < required {
            return Err(MpcError::InsufficientData {
                required,
                got: points.len(),
            });
        }
        let distinct = distinct_abscissae(points);
        if distinct < required {
            return Err(MpcError::InsufficientData {
                required,
                got: distinct,
            });
        }

        let m = points.len();
        let mut a = DMatrix::<f64>::zeros(m, required);
        for (j, p) in points.iter().enumerate() {
            a[(j, 0)] = 1.0;
            for i in 0..degree {
                a[(j, i + 1)] = a[(j, i)] * p.x;
            }
        }
        let y = DVector::from_iterator(m, points.iter().map(|p| p.y));

        let qr = a.qr();
        let qty = qr.q().transpose() * y;
        let coeffs = qr
            .r()
            .solve_upper_triangular(&qty)
            .filter(|c| c.iter().all(|v| v.is_finite()))
            .ok_or(MpcError::InsufficientData {
                required,
                got: distinct,
            })?;

        debug!("fitted reference coefficients {:?}", coeffs.as_slice());
        Ok(Self { coeffs })
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    pub fn coefficients(&self) -> &DVector<f64> {
        &self.coeffs
    }

    /// Horner evaluation.
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    pub fn derivative(&self) -> Self {
        if self.coeffs.len() <= 1 {
            return Self::from_slice(&[0.0]);
        }
        let n = self.coeffs.len() - 1;
        Self::new(DVector::from_fn(n, |i, _| (i + 1) as f64 * self.coeffs[i + 1]))
    }

    /// Tangent direction of the curve at `x`, `atan(f'(x))`.
    pub fn heading_at(&self, x: f64) -> f64 {
        self.derivative().eval(x).atan()
    }

    /// Samples `(x, f(x))` at `x = spacing, 2·spacing, ..., count·spacing`.
    pub fn sample(&self, count: usize, spacing: f64) -> Vec<Point2<f64>> {
        (1..=count)
            .map(|i| {
                let x = i as f64 * spacing;
                Point2::new(x, self.eval(x))
            })
            .collect()
    }
}

fn distinct_abscissae(points: &[Point2<f64>]) -> usize {
    let mut xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    xs.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(xs: &[f64], f: impl Fn(f64) -> f64) -> Vec<Point2<f64>> {
        xs.iter().map(|&x| Point2::new(x, f(x))).collect()
    }

    #[test]
    fn recovers_cubic_from_four_points() {
        let truth = ReferencePolynomial::from_slice(&[1.5, -0.3, 0.02, -0.001]);
        let pts = points(&[-5.0, 4.0, 17.0, 33.0], |x| truth.eval(x));
        let fitted = ReferencePolynomial::fit(&pts, 3).unwrap();
        for (a, b) in fitted.coefficients().iter().zip(truth.coefficients().iter()) {
            assert!((a - b).abs() < 1e-7, "{a} vs {b}");
        }
    }

    #[test]
    fn least_squares_with_extra_points() {
        let pts = points(&[0.0, 5.0, 10.0, 15.0, 20.0, 25.0], |x| 2.0 - 0.5 * x);
        let fitted = ReferencePolynomial::fit(&pts, 3).unwrap();
        assert!((fitted.eval(0.0) - 2.0).abs() < 1e-9);
        assert!((fitted.derivative().eval(12.0) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn too_few_points() {
        let pts = points(&[0.0, 1.0, 2.0], |x| x);
        assert_eq!(
            ReferencePolynomial::fit(&pts, 3),
            Err(MpcError::InsufficientData { required: 4, got: 3 })
        );
        assert_eq!(
            ReferencePolynomial::fit(&[], 3),
            Err(MpcError::InsufficientData { required: 4, got: 0 })
        );
    }

    #[test]
    fn repeated_abscissae_are_insufficient() {
        let pts = points(&[1.0, 1.0, 2.0, 2.0, 3.0], |x| x * x);
        assert_eq!(
            ReferencePolynomial::fit(&pts, 3),
            Err(MpcError::InsufficientData { required: 4, got: 3 })
        );
    }

    #[test]
    fn evaluator_and_derivative() {
        let poly = ReferencePolynomial::from_slice(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(poly.eval(0.0), 1.0);
        assert_eq!(poly.eval(2.0), 1.0 + 4.0 + 12.0 + 32.0);
        let d = poly.derivative();
        assert_eq!(d.coefficients().as_slice(), &[2.0, 6.0, 12.0]);
        assert_eq!(d.derivative().derivative().derivative().eval(3.0), 0.0);
        assert!((poly.heading_at(0.0) - 2.0f64.atan()).abs() < 1e-12);
    }

    #[test]
    fn samples_start_one_step_ahead() {
        let poly = ReferencePolynomial::from_slice(&[0.5, 0.0, 0.0, 0.0]);
        let line = poly.sample(4, 2.5);
        assert_eq!(line.len(), 4);
        assert_eq!(line[0], Point2::new(2.5, 0.5));
        assert_eq!(line[3], Point2::new(10.0, 0.5));
    }
}
