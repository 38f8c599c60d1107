// 📐 Statistical Distributions - the numeric kernels behind the trend tests
//
// Student t, normal and chi-squared distribution functions built on the
// log-gamma function and the regularized incomplete beta/gamma functions,
// plus the Shapiro-Wilk normality test (Royston's AS R94 approximation).

use std::f64::consts::PI;

const EPS: f64 = 1e-15;
const FPMIN: f64 = 1e-300;
const MAX_ITERATIONS: usize = 500;

// ============================================================================
// SPECIAL FUNCTIONS
// ============================================================================

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function (Lanczos approximation, x > 0)
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS_COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS_COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));

    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularized incomplete beta function I_x(a, b)
pub fn incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let front = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();

    // The continued fraction converges fastest on this side of the mean
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = clamp_tiny(1.0 - qab * x / qap).recip();
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        // Even step
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = clamp_tiny(1.0 + aa * d).recip();
        c = clamp_tiny(1.0 + aa / c);
        h *= d * c;

        // Odd step
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = clamp_tiny(1.0 + aa * d).recip();
        c = clamp_tiny(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

/// Upper regularized incomplete gamma function Q(a, x) = 1 - P(a, x)
pub fn incomplete_gamma_upper(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }

    let log_prefactor = -x + a * x.ln() - ln_gamma(a);

    if x < a + 1.0 {
        // Series for P(a, x)
        let mut ap = a;
        let mut term = 1.0 / a;
        let mut sum = term;
        for _ in 0..MAX_ITERATIONS {
            ap += 1.0;
            term *= x / ap;
            sum += term;
            if term.abs() < sum.abs() * EPS {
                break;
            }
        }
        1.0 - sum * log_prefactor.exp()
    } else {
        // Continued fraction for Q(a, x)
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / FPMIN;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITERATIONS {
            let i = i as f64;
            let an = -i * (i - a);
            b += 2.0;
            d = clamp_tiny(an * d + b).recip();
            c = clamp_tiny(b + an / c);
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        log_prefactor.exp() * h
    }
}

fn clamp_tiny(v: f64) -> f64 {
    if v.abs() < FPMIN {
        FPMIN
    } else {
        v
    }
}

/// Complementary error function (Chebyshev fit, fractional error < 1.2e-7)
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();

    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

// ============================================================================
// DISTRIBUTIONS
// ============================================================================

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal upper tail P(Z > x)
pub fn normal_sf(x: f64) -> f64 {
    0.5 * erfc(x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile (Acklam's rational approximation, rel. error < 1.2e-9)
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Student t CDF with `df` degrees of freedom
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    let tail = 0.5 * incomplete_beta(df / (df + t * t), 0.5 * df, 0.5);
    if t > 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Two-sided p-value P(|T| >= |t|)
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    if t.is_nan() {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    incomplete_beta(df / (df + t * t), 0.5 * df, 0.5).clamp(0.0, 1.0)
}

/// Student t quantile (bisection on the CDF)
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < 0.5 {
        return -student_t_quantile(1.0 - p, df);
    }
    if p == 0.5 {
        return 0.0;
    }

    let mut lo = 0.0;
    let mut hi = 1.0;
    while student_t_cdf(hi, df) < p && hi < 1e12 {
        lo = hi;
        hi *= 2.0;
    }

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-14 * hi.max(1.0) {
            break;
        }
    }

    0.5 * (lo + hi)
}

/// Chi-squared upper tail P(X > x) with `df` degrees of freedom
pub fn chi_squared_sf(x: f64, df: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    incomplete_gamma_upper(0.5 * df, 0.5 * x).clamp(0.0, 1.0)
}

// ============================================================================
// SHAPIRO-WILK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapiroWilk {
    pub w: f64,
    pub p_value: f64,
}

fn polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Shapiro-Wilk W statistic and p-value.
///
/// None for fewer than 3 or more than 5000 values, or when all values are
/// (numerically) identical.
pub fn shapiro_wilk(values: &[f64]) -> Option<ShapiroWilk> {
    const SMALL: f64 = 1e-19;
    const G: [f64; 2] = [-2.273, 0.459];
    const C1: [f64; 6] = [0.0, 0.221_157, -0.147_981, -2.071_19, 4.434_685, -2.706_056];
    const C2: [f64; 6] = [0.0, 0.042_981, -0.293_762, -1.752_461, 5.682_633, -3.582_633];
    const C3: [f64; 4] = [0.544, -0.399_78, 0.025_054, -6.714e-4];
    const C4: [f64; 4] = [1.3822, -0.778_57, 0.062_767, -0.002_032_2];
    const C5: [f64; 4] = [-1.5861, -0.310_82, -0.083_751, 0.003_891_5];
    const C6: [f64; 3] = [-0.4803, -0.082_676, 0.003_030_2];

    let n = values.len();
    if !(3..=5000).contains(&n) || values.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut x = values.to_vec();
    x.sort_by(|a, b| a.total_cmp(b));

    let range = x[n - 1] - x[0];
    if range < SMALL {
        return None;
    }

    // Half-vector of coefficients a[0..n/2]
    let an = n as f64;
    let half = n / 2;
    let mut a = vec![0.0; half];

    if n == 3 {
        a[0] = 0.5_f64.sqrt();
    } else {
        let m: Vec<f64> = (1..=half)
            .map(|i| normal_quantile((i as f64 - 0.375) / (an + 0.25)))
            .collect();
        let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
        let ssumm2 = summ2.sqrt();
        let rsn = 1.0 / an.sqrt();
        let a1 = polynomial(&C1, rsn) - m[0] / ssumm2;

        let (first_free, fac) = if n > 5 {
            let a2 = -m[1] / ssumm2 + polynomial(&C2, rsn);
            a[1] = a2;
            let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
                / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
                .sqrt();
            (2, fac)
        } else {
            let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
            (1, fac)
        };

        a[0] = a1;
        for i in first_free..half {
            a[i] = -m[i] / fac;
        }
    }

    // Full antisymmetric coefficient vector against the sorted sample
    let mut coefficients = vec![0.0; n];
    for (i, &ai) in a.iter().enumerate() {
        coefficients[i] = -ai;
        coefficients[n - 1 - i] = ai;
    }

    // W as the squared correlation of data and coefficients; 1 - W kept separately
    let scaled: Vec<f64> = x.iter().map(|v| v / range).collect();
    let mean_a = coefficients.iter().sum::<f64>() / an;
    let mean_x = scaled.iter().sum::<f64>() / an;

    let (mut ssa, mut ssx, mut sax) = (0.0, 0.0, 0.0);
    for (ca, xs) in coefficients.iter().zip(&scaled) {
        let da = ca - mean_a;
        let dx = xs - mean_x;
        ssa += da * da;
        ssx += dx * dx;
        sax += da * dx;
    }

    let root = (ssa * ssx).sqrt();
    let w1 = ((root - sax) * (root + sax) / (ssa * ssx)).max(0.0);
    let w = 1.0 - w1;

    if n == 3 {
        let p_value = (6.0 / PI * (w.sqrt().asin() - PI / 3.0)).clamp(0.0, 1.0);
        return Some(ShapiroWilk { w, p_value });
    }

    let mut y = w1.ln();
    let (mean, sd) = if n <= 11 {
        let gamma = polynomial(&G, an);
        if y >= gamma {
            return Some(ShapiroWilk { w, p_value: 1e-99 });
        }
        y = -(gamma - y).ln();
        (polynomial(&C3, an), polynomial(&C4, an).exp())
    } else {
        let ln_n = an.ln();
        (polynomial(&C5, ln_n), polynomial(&C6, ln_n).exp())
    };

    let p_value = normal_sf((y - mean) / sd).clamp(0.0, 1.0);
    Some(ShapiroWilk { w, p_value })
}

// ============================================================================
// TESTS
// ============================================================================
