//! Basis-function families for edge fits.
//!
//! All families are evaluated on the normalized domain `t ∈ [-1, 1]`;
//! `minv`/`maxv` map the physical abscissa onto it. Legendre and Chebyshev
//! use their three-term recurrences.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasisFamily {
    /// Plain powers of the normalized abscissa.
    Polynomial,
    #[default]
    Legendre,
    Chebyshev,
}

/// Map `x` from `[minv, maxv]` onto `[-1, 1]`.
#[inline]
pub fn normalize(x: f64, minv: f64, maxv: f64) -> f64 {
    let span = maxv - minv;
    if span.abs() < f64::EPSILON {
        0.0
    } else {
        2.0 * (x - minv) / span - 1.0
    }
}

/// Values of the first `order + 1` basis functions at normalized `t`.
pub fn basis_values(family: BasisFamily, order: usize, t: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(order + 1);
    out.push(1.0);
    if order == 0 {
        return out;
    }
    out.push(t);
    for n in 1..order {
        let next = match family {
            BasisFamily::Polynomial => out[n] * t,
            BasisFamily::Legendre => {
                let nf = n as f64;
                ((2.0 * nf + 1.0) * t * out[n] - nf * out[n - 1]) / (nf + 1.0)
            }
            BasisFamily::Chebyshev => 2.0 * t * out[n] - out[n - 1],
        };
        out.push(next);
    }
    out
}

/// Evaluate a fitted coefficient vector at physical abscissa `x`.
pub fn eval_basis_fit(family: BasisFamily, coeffs: &[f64], x: f64, minv: f64, maxv: f64) -> f64 {
    if coeffs.is_empty() {
        return f64::NAN;
    }
    let t = normalize(x, minv, maxv);
    basis_values(family, coeffs.len() - 1, t)
        .iter()
        .zip(coeffs)
        .map(|(b, c)| b * c)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_domain_ends() {
        assert_eq!(normalize(0.0, 0.0, 10.0), -1.0);
        assert_eq!(normalize(10.0, 0.0, 10.0), 1.0);
        assert_eq!(normalize(5.0, 0.0, 10.0), 0.0);
    }

    #[test]
    fn legendre_matches_known_values() {
        // P2(t) = (3t^2 - 1)/2, P3(t) = (5t^3 - 3t)/2
        let v = basis_values(BasisFamily::Legendre, 3, 0.5);
        assert!((v[2] - (3.0 * 0.25 - 1.0) / 2.0).abs() < 1e-12);
        assert!((v[3] - (5.0 * 0.125 - 3.0 * 0.5) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn chebyshev_matches_known_values() {
        // T2(t) = 2t^2 - 1, T3(t) = 4t^3 - 3t
        let v = basis_values(BasisFamily::Chebyshev, 3, 0.3);
        assert!((v[2] - (2.0 * 0.09 - 1.0)).abs() < 1e-12);
        assert!((v[3] - (4.0 * 0.027 - 3.0 * 0.3)).abs() < 1e-12);
    }

    #[test]
    fn polynomial_powers() {
        let v = basis_values(BasisFamily::Polynomial, 3, 2.0);
        assert_eq!(v, vec![1.0, 2.0, 4.0, 8.0]);
    }
}
