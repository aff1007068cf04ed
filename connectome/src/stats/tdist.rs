//! Student t分布的双侧p值。

const LANCZOS: [f64; 6] = [
    76.180_091_729_471_46,
    -86.505_320_329_416_77,
    24.014_098_240_830_91,
    -1.231_739_572_450_155,
    0.120_865_097_386_617_9e-2,
    -0.539_523_938_495_3e-5,
];
const CF_MAX_ITER: usize = 300;
const CF_EPS: f64 = 3e-16;
const CF_FPMIN: f64 = 1e-300;

/// `ln Γ(x)`，`x > 0`。
pub fn ln_gamma(x: f64) -> f64 {
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    let mut y = x;
    for c in LANCZOS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

/// 正则化不完全Beta函数`I_x(a, b)`。
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(a, b, x) / a
    } else {
        1.0 - front * beta_cf(b, a, 1.0 - x) / b
    }
}

/// Lentz算法求不完全Beta函数的连分式。
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < CF_FPMIN {
        d = CF_FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=CF_MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < CF_FPMIN {
            d = CF_FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < CF_FPMIN {
            c = CF_FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < CF_FPMIN {
            d = CF_FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < CF_FPMIN {
            c = CF_FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < CF_EPS {
            break;
        }
    }
    h
}

/// 自由度为`df`的t统计量的双侧p值。`df <= 0`或`t`非有限时返回1。
pub fn two_sided_p(t: f64, df: f64) -> f64 {
    if !(df > 0.0) || t.is_nan() {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    incomplete_beta(df / 2.0, 0.5, df / (df + t * t)).clamp(0.0, 1.0)
}

/// 样本量为`n`的Pearson相关系数`r`的双侧p值（`n - 2`个自由度）。
pub fn correlation_p(r: f64, n: usize) -> f64 {
    if n < 3 || !r.is_finite() {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let r = r.clamp(-1.0, 1.0);
    let denom = 1.0 - r * r;
    if denom <= 0.0 {
        return 0.0;
    }
    two_sided_p(r * (df / denom).sqrt(), df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ln_gamma() {
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-8);
        assert_relative_eq!(ln_gamma(5.0), (24.0_f64).ln(), epsilon = 1e-8);
        assert_relative_eq!(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), epsilon = 1e-8);
    }

    #[test]
    fn test_known_p_values() {
        // t=2.228, df=10 => p≈0.05
        assert_relative_eq!(two_sided_p(2.228, 10.0), 0.05, epsilon = 1e-3);
        // t=0 => p=1
        assert_relative_eq!(two_sided_p(0.0, 5.0), 1.0, epsilon = 1e-12);
        // df=1时为Cauchy分布：p = 1 - 2·atan(t)/π
        let t: f64 = 1.7;
        let expected = 1.0 - 2.0 * t.atan() / std::f64::consts::PI;
        assert_relative_eq!(two_sided_p(t, 1.0), expected, epsilon = 1e-8);
    }

    #[test]
    fn test_correlation_p() {
        assert_eq!(correlation_p(0.5, 2), 1.0);
        assert_eq!(correlation_p(1.0, 10), 0.0);
        assert!(correlation_p(0.9, 20) < 1e-6);
        assert!(correlation_p(0.1, 20) > 0.5);
        assert_eq!(correlation_p(f64::NAN, 20), 1.0);
    }
}
