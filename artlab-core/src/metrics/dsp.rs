//! Numerical helpers for contour analysis: gradients, zero-phase low-pass
//! filtering and quadrature.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

/// Numerical gradient with central differences in the interior and one-sided
/// differences at the boundaries.
pub fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let mut grad = Vec::with_capacity(n);
    grad.push(values[1] - values[0]);
    for i in 1..n - 1 {
        grad.push((values[i + 1] - values[i - 1]) / 2.0);
    }
    grad.push(values[n - 1] - values[n - 2]);
    grad
}

/// Design a digital Butterworth low-pass filter.
///
/// `cutoff` is the critical frequency as a fraction of the Nyquist
/// frequency, as in the usual normalized designs. Returns `(b, a)`
/// transfer-function coefficients with `a[0] == 1`.
pub fn butter_lowpass(order: usize, cutoff: f64) -> (Vec<f64>, Vec<f64>) {
    // Analog prototype poles on the left unit semicircle, pre-warped for the
    // bilinear transform at fs = 2.
    let fs = 2.0;
    let warped = 2.0 * fs * (PI * cutoff / fs).tan();

    let poles: Vec<Complex<f64>> = (0..order)
        .map(|k| {
            let theta = PI / 2.0 + PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
            Complex::new(warped * theta.cos(), warped * theta.sin())
        })
        .collect();
    let gain = warped.powi(order as i32);

    // Bilinear transform: poles map to (2fs + p) / (2fs - p), zeros land at
    // z = -1, and the gain picks up 1 / prod(2fs - p).
    let fs2 = 2.0 * fs;
    let z_poles: Vec<Complex<f64>> = poles
        .iter()
        .map(|p| (Complex::new(fs2, 0.0) + p) / (Complex::new(fs2, 0.0) - p))
        .collect();
    let denom: Complex<f64> = poles
        .iter()
        .map(|p| Complex::new(fs2, 0.0) - p)
        .product();
    let k_z = (Complex::new(gain, 0.0) / denom).re;

    let z_zeros = vec![Complex::new(-1.0, 0.0); order];
    let b: Vec<f64> = poly(&z_zeros).iter().map(|c| c.re * k_z).collect();
    let a: Vec<f64> = poly(&z_poles).iter().map(|c| c.re).collect();

    (b, a)
}

/// Polynomial coefficients (descending powers) from roots.
fn poly(roots: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let mut coeffs = vec![Complex::new(1.0, 0.0)];
    for root in roots {
        coeffs.push(Complex::new(0.0, 0.0));
        for i in (1..coeffs.len()).rev() {
            let prev = coeffs[i - 1];
            coeffs[i] -= root * prev;
        }
    }
    coeffs
}

/// Single-pass IIR filter, direct form II transposed, zero initial state.
fn lfilter(b: &[f64], a: &[f64], input: &[f64]) -> Vec<f64> {
    let order = b.len().max(a.len());
    let a0 = a[0];

    let mut b_norm = vec![0.0; order];
    let mut a_norm = vec![0.0; order];
    for (dst, &src) in b_norm.iter_mut().zip(b.iter()) {
        *dst = src / a0;
    }
    for (dst, &src) in a_norm.iter_mut().zip(a.iter()) {
        *dst = src / a0;
    }

    let mut state = vec![0.0; order.saturating_sub(1)];
    let mut output = Vec::with_capacity(input.len());
    for &x in input {
        let y = b_norm[0] * x + state.first().copied().unwrap_or(0.0);
        for i in 0..state.len() {
            let next = state.get(i + 1).copied().unwrap_or(0.0);
            state[i] = b_norm[i + 1] * x + next - a_norm[i + 1] * y;
        }
        output.push(y);
    }
    output
}

/// Zero-phase filtering: forward pass, then a backward pass over the
/// reversed output. Callers pad the signal themselves; artlab's contour
/// smoothing mirrors a full copy on each side, which makes boundary
/// transients die out before the kept region.
pub fn filtfilt(b: &[f64], a: &[f64], input: &[f64]) -> Vec<f64> {
    let mut forward = lfilter(b, a, input);
    forward.reverse();
    let mut backward = lfilter(b, a, &forward);
    backward.reverse();
    backward
}

/// Composite Simpson quadrature over possibly irregular sample positions.
///
/// Interval pairs use the three-point quadratic rule; a trailing odd
/// interval is closed with the trapezoid rule.
pub fn simpson(y: &[f64], x: &[f64]) -> f64 {
    debug_assert_eq!(y.len(), x.len());
    let n = y.len().min(x.len());
    if n < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut i = 0;
    while i + 2 < n {
        let h0 = x[i + 1] - x[i];
        let h1 = x[i + 2] - x[i + 1];
        if h0 <= 0.0 || h1 <= 0.0 {
            // Degenerate spacing (repeated contour points): fall back to
            // trapezoids over this pair.
            total += 0.5 * h0.max(0.0) * (y[i] + y[i + 1]);
            total += 0.5 * h1.max(0.0) * (y[i + 1] + y[i + 2]);
            i += 2;
            continue;
        }
        let hsum = h0 + h1;
        total += hsum / 6.0
            * (y[i] * (2.0 - h1 / h0)
                + y[i + 1] * hsum * hsum / (h0 * h1)
                + y[i + 2] * (2.0 - h0 / h1));
        i += 2;
    }
    if i + 1 < n {
        total += 0.5 * (x[i + 1] - x[i]) * (y[i] + y[i + 1]);
    }
    total
}
