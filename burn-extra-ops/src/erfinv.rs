//! # Inverse Error Function
//!
//! Element-wise `erfinv` for float tensors, used to map uniform samples onto a truncated
//! normal distribution.
//!
//! A rational approximation gives the first estimate (one form for `|y| <= 0.7`, another
//! for the tails), refined by two Newton steps on `erf(x) - y`. `erfinv(±1)` is `±inf`
//! and inputs outside `[-1, 1]` give NaN.

use core::f64::consts::PI;

use burn::prelude::*;

const CENTRAL_RANGE: f64 = 0.7;
const NEWTON_STEPS: usize = 2;

const CENTRAL_NUM: [f64; 4] = [0.886_226_899, -1.645_349_621, 0.914_624_893, -0.140_543_331];
const CENTRAL_DEN: [f64; 4] = [-2.118_377_725, 1.442_710_462, -0.329_097_515, 0.012_229_801];
const TAIL_NUM: [f64; 4] = [-1.970_840_454, -1.624_906_493, 3.429_567_803, 1.641_345_311];
const TAIL_DEN: [f64; 2] = [3.543_889_200, 1.637_067_800];

/// Inverse error function on tensors.
pub trait Erfinv {
    /// Applies `erfinv` element-wise.
    fn erfinv(self) -> Self;
}

impl<B: Backend, const D: usize> Erfinv for Tensor<B, D> {
    fn erfinv(self) -> Self {
        erfinv(self)
    }
}

/// Element-wise inverse error function.
pub fn erfinv<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    let y_abs = y.clone().abs();

    let central = y_abs.clone().lower_equal_elem(CENTRAL_RANGE);
    let estimate = tail_estimate(y.clone()).mask_where(central, central_estimate(y.clone()));
    let refined = newton(estimate, y.clone());

    let saturated = y_abs.clone().greater_equal_elem(1.0);
    let refined = refined.mask_where(saturated, y.sign().mul_scalar(f64::INFINITY));
    refined.mask_fill(y_abs.greater_elem(1.0), f64::NAN)
}

/// Evaluates a polynomial with coefficients in ascending order of power.
fn horner<B: Backend, const D: usize, const N: usize>(
    z: Tensor<B, D>,
    coefficients: &[f64; N],
) -> Tensor<B, D> {
    let leading = z.ones_like().mul_scalar(coefficients[N - 1]);
    coefficients[..N - 1]
        .iter()
        .rev()
        .fold(leading, |acc, &c| (acc * z.clone()).add_scalar(c))
}

fn central_estimate<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    let z = y.clone().powf_scalar(2.0);
    let num = horner(z.clone(), &CENTRAL_NUM);
    // 1 + b0 z + b1 z^2 + b2 z^3 + b3 z^4
    let den = (horner(z.clone(), &CENTRAL_DEN) * z).add_scalar(1.0);
    y * num / den
}

fn tail_estimate<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    // sqrt(-ln((1 - |y|) / 2))
    let z = y
        .clone()
        .abs()
        .neg()
        .add_scalar(1.0)
        .div_scalar(2.0)
        .log()
        .neg()
        .sqrt();
    let num = horner(z.clone(), &TAIL_NUM);
    let den = (horner(z.clone(), &TAIL_DEN) * z).add_scalar(1.0);
    y.sign() * num / den
}

fn newton<B: Backend, const D: usize>(mut x: Tensor<B, D>, y: Tensor<B, D>) -> Tensor<B, D> {
    let two_over_sqrt_pi = 2.0 / PI.sqrt();
    for _ in 0..NEWTON_STEPS {
        let derivative = x.clone().powf_scalar(2.0).neg().exp().mul_scalar(two_over_sqrt_pi);
        let step = (x.clone().erf() - y.clone()) / derivative;
        x = x - step;
    }
    x
}
