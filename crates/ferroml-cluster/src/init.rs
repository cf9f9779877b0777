//! Seeding strategies for cluster centres.

use std::fmt;

use ferroml_core::{Float, MlError, MlResult, Tensor};
use ferroml_linalg::squared_distance;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

/// Produces `k` starting centres, one per row of a `[k, D]` tensor.
///
/// The engines own the generator and seed it from their configuration, so
/// implementations must draw all randomness from `rng`.
pub trait Initialiser<T: Float>: Send + Sync + fmt::Debug {
    fn generate(&self, data: &Tensor<T>, k: usize, rng: &mut StdRng) -> MlResult<Tensor<T>>;
}

fn check<T: Float>(data: &Tensor<T>, k: usize) -> MlResult<(usize, usize)> {
    let (n, d) = data.matrix_dims()?;
    if k == 0 || n < k {
        return Err(MlError::degenerate(format!(
            "cannot pick {} centres from {} rows",
            k, n
        )));
    }
    Ok((n, d))
}

/// `k` distinct rows chosen uniformly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forgy;

impl<T: Float> Initialiser<T> for Forgy {
    fn generate(&self, data: &Tensor<T>, k: usize, rng: &mut StdRng) -> MlResult<Tensor<T>> {
        let (n, _) = check(data, k)?;
        let rows = index::sample(rng, n, k).into_vec();
        data.select_rows(&rows)
    }
}

/// Every row gets a uniformly random cluster; centres are the cluster means.
/// A cluster left empty takes a random row instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPartition;

impl<T: Float> Initialiser<T> for RandomPartition {
    fn generate(&self, data: &Tensor<T>, k: usize, rng: &mut StdRng) -> MlResult<Tensor<T>> {
        let (n, d) = check(data, k)?;
        let mut sums = vec![T::ZERO; k * d];
        let mut counts = vec![0usize; k];
        for row in data.rows() {
            let c = rng.gen_range(0..k);
            counts[c] += 1;
            for (s, &v) in sums[c * d..(c + 1) * d].iter_mut().zip(row) {
                *s += v;
            }
        }
        for c in 0..k {
            let centre = &mut sums[c * d..(c + 1) * d];
            if counts[c] == 0 {
                centre.copy_from_slice(data.row_slice(rng.gen_range(0..n)));
            } else {
                let m = T::from_usize(counts[c]);
                centre.iter_mut().for_each(|v| *v /= m);
            }
        }
        Tensor::new(sums, vec![k, d])
    }
}

/// K-means++ seeding: after a uniform first pick, each row is chosen with
/// probability proportional to its squared distance to the nearest centre
/// chosen so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct KMeansPlusPlus;

impl<T: Float> Initialiser<T> for KMeansPlusPlus {
    fn generate(&self, data: &Tensor<T>, k: usize, rng: &mut StdRng) -> MlResult<Tensor<T>> {
        let (n, _) = check(data, k)?;
        let first = rng.gen_range(0..n);
        let mut chosen = vec![first];
        let mut nearest: Vec<f64> = data
            .rows()
            .map(|r| squared_distance(r, data.row_slice(first)).to_f64())
            .collect();

        while chosen.len() < k {
            // All weights zero (every row sits on a centre): fall back to uniform.
            let next = match WeightedIndex::new(&nearest) {
                Ok(dist) => dist.sample(rng),
                Err(_) => rng.gen_range(0..n),
            };
            chosen.push(next);
            let centre = data.row_slice(next);
            for (dist, row) in nearest.iter_mut().zip(data.rows()) {
                *dist = dist.min(squared_distance(row, centre).to_f64());
            }
        }
        data.select_rows(&chosen)
    }
}
