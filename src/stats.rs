//! Small numeric routines used by feature selection: Pearson correlation,
//! ordinary least squares with an intercept and Student's t tail
//! probabilities.

use std::f64::consts::PI;

use num::Float;
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linalg::traits::cholesky::CholeskyDecomposable;

/// Variance inflation above which a design counts as collinear.
const MAX_VARIANCE_INFLATION: f64 = 1e10;

pub fn mean<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::zero();
    }
    let sum = values.iter().fold(T::zero(), |acc, v| acc + *v);
    sum / T::from(values.len()).unwrap_or_else(T::one)
}

/// Population standard deviation.
pub fn std_dev<T: Float>(values: &[T]) -> T {
    if values.is_empty() {
        return T::zero();
    }
    let m = mean(values);
    let n = T::from(values.len()).unwrap_or_else(T::one);
    let var = values
        .iter()
        .fold(T::zero(), |acc, v| acc + (*v - m) * (*v - m))
        / n;
    var.sqrt()
}

/// Pearson correlation. Zero when either side has no variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    sxy / (sxx.sqrt() * syy.sqrt())
}

/// Coefficient estimates of one regressor.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OlsFit {
    pub intercept: f64,
    /// One entry per column of the design matrix, in order.
    pub coefficients: Vec<Coefficient>,
    pub degrees_of_freedom: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OlsError {
    TooFewRows { rows: usize, needed: usize },
    ZeroVariance { column: usize },
    Singular,
}

/// Fit `y = b0 + X b` by least squares.
///
/// Columns are standardised before solving; t statistics are invariant to
/// that rescaling and the reported estimates are mapped back to the
/// original units.
pub fn ols(columns: &[Vec<f64>], y: &[f64]) -> Result<OlsFit, OlsError> {
    let n = y.len();
    let p = columns.len();
    if n <= p + 1 {
        return Err(OlsError::TooFewRows {
            rows: n,
            needed: p + 2,
        });
    }

    let mut centers = Vec::with_capacity(p);
    let mut scales = Vec::with_capacity(p);
    for (j, column) in columns.iter().enumerate() {
        let sd = std_dev(column);
        if sd == 0.0 {
            return Err(OlsError::ZeroVariance { column: j });
        }
        centers.push(mean(column));
        scales.push(sd);
    }

    // Normal equations on [1, z_1 .. z_p].
    let dim = p + 1;
    let mut xtx = vec![vec![0.0; dim]; dim];
    let mut xty = vec![0.0; dim];
    let mut row = vec![0.0; dim];
    for i in 0..n {
        row[0] = 1.0;
        for j in 0..p {
            row[j + 1] = (columns[j][i] - centers[j]) / scales[j];
        }
        for a in 0..dim {
            xty[a] += row[a] * y[i];
            for b in a..dim {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    for a in 0..dim {
        for b in 0..a {
            xtx[a][b] = xtx[b][a];
        }
    }

    let inverse = invert_normal_matrix(&xtx, n)?;
    let beta: Vec<f64> = inverse
        .iter()
        .map(|r| r.iter().zip(&xty).map(|(a, b)| a * b).sum())
        .collect();

    let mut rss = 0.0;
    for i in 0..n {
        let mut fitted = beta[0];
        for j in 0..p {
            fitted += beta[j + 1] * (columns[j][i] - centers[j]) / scales[j];
        }
        rss += (y[i] - fitted).powi(2);
    }
    let dof = n - p - 1;
    let sigma2 = rss / dof as f64;

    let mut coefficients = Vec::with_capacity(p);
    let mut intercept = beta[0];
    for j in 0..p {
        let b = beta[j + 1];
        let se = (sigma2 * inverse[j + 1][j + 1]).max(0.0).sqrt();
        let (t_value, p_value) = if se > 0.0 {
            let t = b / se;
            (t, students_t_two_sided(t, dof as f64))
        } else if b == 0.0 {
            (0.0, 1.0)
        } else {
            (b.signum() * f64::INFINITY, 0.0)
        };
        intercept -= b * centers[j] / scales[j];
        coefficients.push(Coefficient {
            estimate: b / scales[j],
            std_error: se / scales[j],
            t_value,
            p_value,
        });
    }

    Ok(OlsFit {
        intercept,
        coefficients,
        degrees_of_freedom: dof,
    })
}

/// `(X'X)^-1` of a standardised design with `n` rows, through a Cholesky
/// factorisation.
fn invert_normal_matrix(xtx: &Vec<Vec<f64>>, n: usize) -> Result<Vec<Vec<f64>>, OlsError> {
    let dim = xtx.len();
    let identity: Vec<Vec<f64>> = (0..dim)
        .map(|i| (0..dim).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    let solved = DenseMatrix::from_2d_vec(xtx)
        .cholesky_solve_mut(DenseMatrix::from_2d_vec(&identity))
        .map_err(|_| OlsError::Singular)?;
    let inverse: Vec<Vec<f64>> = (0..dim)
        .map(|i| (0..dim).map(|j| *solved.get((i, j))).collect())
        .collect();

    // On standardised columns n * diag((X'X)^-1) is the variance inflation.
    let collinear = (0..dim).any(|j| {
        let inflation = inverse[j][j] * n as f64;
        !inflation.is_finite() || inflation <= 0.0 || inflation > MAX_VARIANCE_INFLATION
    });
    if collinear {
        return Err(OlsError::Singular);
    }
    Ok(inverse)
}

/// Two-sided tail probability `P(|T| >= |t|)` of Student's t with `dof`
/// degrees of freedom.
pub fn students_t_two_sided(t: f64, dof: f64) -> f64 {
    if t.is_nan() || dof <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    let x = dof / (dof + t * t);
    regularized_beta(x, dof / 2.0, 0.5).clamp(0.0, 1.0)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos, g = 7
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let t = x + G + 0.5;
        let mut a = COEFFS[0];
        for (i, c) in COEFFS.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

/// Regularised incomplete beta function `I_x(a, b)`.
fn regularized_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

// Modified Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 500;
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}
