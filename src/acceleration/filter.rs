//! Column filters for the quasi-Newton least-squares system.
//!
//! A filter inspects the diagonal of `R` and names the column whose
//! orthogonal component is smallest relative to its threshold. The QR
//! utility removes that column and asks again until nothing violates the
//! limit (see [`QrFactorization::apply_filter`](crate::acceleration::qr::QrFactorization::apply_filter)).

use crate::acceleration::qr::QrFactorization;
use serde::{Deserialize, Serialize};

/// Filter policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Keep every column.
    None,
    /// Drop columns with `|R_ii| < limit * ||R||_F`.
    Qr1,
    /// Drop columns with `|R_ii| < limit * ||v_i||`.
    #[default]
    Qr2,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Filter {
    pub kind: FilterKind,
    pub singularity_limit: f64,
}

impl Filter {
    pub fn new(kind: FilterKind, singularity_limit: f64) -> Self {
        Self {
            kind,
            singularity_limit,
        }
    }

    /// Column with the smallest `|R_ii| / threshold_i` below 1, ties to the
    /// lowest index (the oldest column).
    pub fn most_redundant(&self, qr: &QrFactorization) -> Option<usize> {
        let r = qr.r();
        let frobenius = r.norm();
        let mut worst: Option<(usize, f64)> = None;
        for i in 0..qr.cols() {
            let threshold = match self.kind {
                FilterKind::None => return None,
                FilterKind::Qr1 => self.singularity_limit * frobenius,
                FilterKind::Qr2 => self.singularity_limit * qr.column_norm(i),
            };
            if threshold <= 0.0 {
                continue;
            }
            let ratio = r[(i, i)].abs() / threshold;
            if ratio < 1.0 && worst.is_none_or(|(_, w)| ratio < w) {
                worst = Some((i, ratio));
            }
        }
        worst.map(|(i, _)| i)
    }
}
