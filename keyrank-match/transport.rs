//! Log-domain optimal transport with a dustbin row and column, and the
//! extraction of mutual matches from the resulting assignment.

use keyrank_core::nn::log_sum_exp;
use keyrank_core::MatchSet;
use ndarray::{Array1, Array2, Axis, Zip, s};

/// Alternating row/column normalization in log space.
///
/// Returns `Z + u + v` after `iters` rounds, starting from `u = v = 0`.
pub fn log_sinkhorn_iterations(z: &Array2<f32>, log_mu: &Array1<f32>, log_nu: &Array1<f32>, iters: usize) -> Array2<f32> {
    let mut u = Array1::<f32>::zeros(log_mu.len());
    let mut v = Array1::<f32>::zeros(log_nu.len());

    for _ in 0..iters {
        Zip::from(&mut u).and(z.rows()).and(log_mu).par_for_each(|u, row, &mu| {
            *u = mu - log_sum_exp(row.iter().zip(&v).map(|(&a, &b)| a + b));
        });
        Zip::from(&mut v).and(z.columns()).and(log_nu).par_for_each(|v, column, &nu| {
            *v = nu - log_sum_exp(column.iter().zip(&u).map(|(&a, &b)| a + b));
        });
    }

    let mut out = z.clone();
    out += &u.view().insert_axis(Axis(1));
    out += &v.view().insert_axis(Axis(0));
    out
}

/// Log marginals of an `(m + 1) x (n + 1)` problem where the dustbins absorb
/// the mass of the other side
pub fn log_marginals(m: usize, n: usize) -> (Array1<f32>, Array1<f32>, f32) {
    let norm = -((m + n) as f32).ln();
    let mut log_mu = Array1::from_elem(m + 1, norm);
    log_mu[m] = (n as f32).ln() + norm;
    let mut log_nu = Array1::from_elem(n + 1, norm);
    log_nu[n] = (m as f32).ln() + norm;
    (log_mu, log_nu, norm)
}

/// Differentiable assignment of an `m x n` score matrix. The dustbin row,
/// column and corner all hold `bin_score`. The result is the log assignment,
/// shape `(m + 1) x (n + 1)`, rescaled so that every real row sums to 1 in
/// probability space once converged.
///
/// Callers handle `m + n == 0`; the marginals are undefined there.
pub fn log_optimal_transport(scores: &Array2<f32>, bin_score: f32, iters: usize) -> Array2<f32> {
    let (m, n) = scores.dim();
    let mut couplings = Array2::from_elem((m + 1, n + 1), bin_score);
    couplings.slice_mut(s![..m, ..n]).assign(scores);

    let (log_mu, log_nu, norm) = log_marginals(m, n);
    let mut z = log_sinkhorn_iterations(&couplings, &log_mu, &log_nu, iters);
    z -= norm;
    z
}

/// L1 distance of the row and column marginals of a log coupling from their
/// targets, in probability space
pub fn marginal_error(z: &Array2<f32>, log_mu: &Array1<f32>, log_nu: &Array1<f32>) -> f32 {
    let rows = z
        .rows()
        .into_iter()
        .zip(log_mu)
        .map(|(row, &mu)| (log_sum_exp(row.iter().copied()).exp() - mu.exp()).abs());
    let columns = z
        .columns()
        .into_iter()
        .zip(log_nu)
        .map(|(column, &nu)| (log_sum_exp(column.iter().copied()).exp() - nu.exp()).abs());
    rows.chain(columns).sum()
}

/// First index of the maximum, `None` for an empty lane
fn argmax<'a>(values: impl Iterator<Item = &'a f32>) -> Option<(usize, f32)> {
    values.enumerate().fold(None, |best, (i, &v)| match best {
        Some((_, b)) if v <= b => best,
        _ => Some((i, v)),
    })
}

/// Mutual nearest neighbours on the real block of a log assignment whose
/// probability exceeds `threshold`.
///
/// Both directions carry the same pairs with the same confidence; everything
/// else is [`NO_MATCH`] with confidence 0.
pub fn mutual_matches(z: &Array2<f32>, threshold: f32) -> MatchSet {
    let (m, n) = (z.nrows().saturating_sub(1), z.ncols().saturating_sub(1));
    let block = z.slice(s![..m, ..n]);

    let best0: Vec<Option<(usize, f32)>> = block.rows().into_iter().map(|row| argmax(row.iter())).collect();
    let best1: Vec<Option<usize>> = block
        .columns()
        .into_iter()
        .map(|column| argmax(column.iter()).map(|(i, _)| i))
        .collect();

    let mut matches = MatchSet::unmatched(m, n);
    for (i, best) in best0.into_iter().enumerate() {
        let Some((j, log_p)) = best else {
            continue;
        };
        if best1[j] != Some(i) {
            continue;
        }
        let confidence = log_p.exp();
        if confidence > threshold {
            matches.matches0[i] = j as i32;
            matches.confidence0[i] = confidence;
            matches.matches1[j] = i as i32;
            matches.confidence1[j] = confidence;
        }
    }
    matches
}
