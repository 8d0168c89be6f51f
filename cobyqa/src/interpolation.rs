//! Interpolation set.
//!
//! Stores a base point around which the quadratic models are expanded and
//! the interpolation points, whose coordinates are kept relative to the
//! base point.

use cq_core::Real;
use cq_math::{Array, Matrix};

use crate::problem::Problem;
use crate::settings::ResolvedOptions;

/// Interpolation set: a base point and `npt` displacements from it.
pub(crate) struct Interpolation {
    x_base: Array,
    xpt: Matrix,
}

impl Interpolation {
    /// Build the initial interpolation set.
    ///
    /// Reduces the initial trust-region radius when the bounds box is too
    /// small for it (mutating the resolved options), snaps the base point
    /// to nearby bounds, and lays out the initial points at `±radius`
    /// along the coordinate directions.
    pub fn new(pb: &Problem<'_>, options: &mut ResolvedOptions) -> Self {
        let n = pb.n();
        let (xl, xu) = (pb.xl(), pb.xu());

        // Reduce the initial trust-region radius if necessary.
        let mut max_radius = Real::INFINITY;
        for i in 0..n {
            max_radius = max_radius.min(0.5 * (xu[i] - xl[i]));
        }
        if options.radius_init > max_radius {
            options.radius_init = max_radius;
            options.radius_final = options.radius_final.min(max_radius);
        }
        let radius = options.radius_init;

        // Set the base point, snapping the coordinates close to a bound.
        let mut x_base = pb.x0().clone();
        let mut very_close_xl = vec![false; n];
        let mut very_close_xu = vec![false; n];
        for i in 0..n {
            if x_base[i] <= xl[i] + 0.5 * radius {
                x_base[i] = xl[i];
                very_close_xl[i] = true;
            } else if x_base[i] <= xl[i] + radius {
                x_base[i] = (xl[i] + radius).min(xu[i]);
            } else if x_base[i] >= xu[i] - 0.5 * radius {
                x_base[i] = xu[i];
                very_close_xu[i] = true;
            } else if x_base[i] >= xu[i] - radius {
                x_base[i] = (xu[i] - radius).max(xl[i]);
            }
        }

        // Set the initial interpolation points around the base point.
        let npt = options.npt;
        let mut xpt = Matrix::zeros(n, npt);
        for k in 1..npt {
            if k <= n {
                let i = k - 1;
                xpt[(i, k)] = if very_close_xu[i] { -radius } else { radius };
            } else if k <= 2 * n {
                let i = k - n - 1;
                xpt[(i, k)] = if very_close_xl[i] {
                    2.0 * radius
                } else if very_close_xu[i] {
                    -2.0 * radius
                } else {
                    -radius
                };
            } else {
                // Pick two coordinate perturbations assigned earlier and
                // combine them.
                let spread = (k - n - 1) / n;
                let k1 = k - (1 + spread) * n - 1;
                let k2 = (k1 + spread) % n;
                xpt[(k1, k)] = xpt[(k1, k1 + 1)];
                xpt[(k2, k)] = xpt[(k2, k2 + 1)];
            }
        }
        Self { x_base, xpt }
    }

    #[cfg(test)]
    pub fn from_parts(x_base: Array, xpt: Matrix) -> Self {
        Self { x_base, xpt }
    }

    /// Number of variables.
    pub fn n(&self) -> usize {
        self.xpt.rows()
    }

    /// Number of interpolation points.
    pub fn npt(&self) -> usize {
        self.xpt.cols()
    }

    /// Base point around which the models are expanded.
    pub fn x_base(&self) -> &Array {
        &self.x_base
    }

    /// Interpolation points, relative to the base point (one per column).
    pub fn xpt(&self) -> &Matrix {
        &self.xpt
    }

    /// The `k`-th interpolation point, relative to the origin.
    pub fn point(&self, k: usize) -> Array {
        &self.x_base + &self.xpt.column(k)
    }

    /// Replace the `k`-th displacement.
    pub fn set_displacement(&mut self, k: usize, d: &Array) {
        self.xpt.set_column(k, d);
    }

    /// Translate the base point by `shift` without moving the
    /// interpolation points.
    pub fn translate(&mut self, shift: &Array) {
        self.x_base = &self.x_base + shift;
        for k in 0..self.npt() {
            let col = self.xpt.column(k) - shift;
            self.xpt.set_column(k, &col);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Constraints;
    use crate::settings::Options;
    use cq_core::Real;

    fn sphere(x: &Array) -> Real {
        x.norm_squared()
    }

    fn build(x0: &[Real], cons: &Constraints<'_>, options: &Options) -> (Interpolation, Real) {
        let x0 = Array::from_slice(x0);
        let pb = Problem::new(&sphere, &x0, cons, options).unwrap();
        let mut ropts = options.resolve(pb.n()).unwrap();
        let interp = Interpolation::new(&pb, &mut ropts);
        (interp, ropts.radius_init)
    }

    #[test]
    fn initial_layout_unbounded() {
        let (interp, radius) = build(&[1.0, 2.0], &Constraints::default(), &Options::default());
        assert_eq!(interp.n(), 2);
        assert_eq!(interp.npt(), 5);
        assert_eq!(radius, 1.0);
        // Column 0 is the base point itself.
        assert_eq!(interp.xpt().column(0).norm(), 0.0);
        // Columns 1..=n carry +radius, columns n+1..=2n carry -radius.
        assert_eq!(interp.xpt()[(0, 1)], 1.0);
        assert_eq!(interp.xpt()[(1, 2)], 1.0);
        assert_eq!(interp.xpt()[(0, 3)], -1.0);
        assert_eq!(interp.xpt()[(1, 4)], -1.0);
    }

    #[test]
    fn radius_capped_by_bounds() {
        let cons = Constraints {
            xl: Some(Array::from_slice(&[0.0, 0.0])),
            xu: Some(Array::from_slice(&[1.0, 1.0])),
            ..Constraints::default()
        };
        let (_, radius) = build(&[0.5, 0.5], &cons, &Options::default());
        assert_eq!(radius, 0.5);
    }

    #[test]
    fn base_point_snaps_to_bounds() {
        let cons = Constraints {
            xl: Some(Array::from_slice(&[0.0, 0.0])),
            xu: Some(Array::from_slice(&[10.0, 10.0])),
            ..Constraints::default()
        };
        // First coordinate within radius/2 of xl, second within radius of xu.
        let (interp, radius) = build(&[0.3, 9.2], &cons, &Options::default());
        assert_eq!(radius, 1.0);
        assert_eq!(interp.x_base()[0], 0.0);
        assert_eq!(interp.x_base()[1], 9.0);
        // Snapped-to-xl coordinate gets the +2 radius second perturbation.
        assert_eq!(interp.xpt()[(0, 3)], 2.0);
        // Interior coordinate keeps the ±radius pair.
        assert_eq!(interp.xpt()[(1, 2)], 1.0);
        assert_eq!(interp.xpt()[(1, 4)], -1.0);
    }

    #[test]
    fn extra_points_copy_pairs() {
        let opts = Options {
            npt: Some(6),
            ..Options::default()
        };
        let (interp, _) = build(&[0.0, 0.0], &Constraints::default(), &opts);
        // k = 5 = 2n + 1: spread 1, k1 = 0, k2 = 1.
        assert_eq!(interp.xpt()[(0, 5)], interp.xpt()[(0, 1)]);
        assert_eq!(interp.xpt()[(1, 5)], interp.xpt()[(1, 2)]);
    }

    #[test]
    fn translate_preserves_absolute_points() {
        let (mut interp, _) = build(&[1.0, 2.0], &Constraints::default(), &Options::default());
        let before: Vec<Array> = (0..interp.npt()).map(|k| interp.point(k)).collect();
        interp.translate(&Array::from_slice(&[0.5, -0.25]));
        for (k, b) in before.iter().enumerate() {
            assert!((interp.point(k) - b).norm() < 1e-14);
        }
    }
}
