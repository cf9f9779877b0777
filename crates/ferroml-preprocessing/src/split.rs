use ferroml_core::{MlError, MlResult};

/// One train/test partition of row indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Contiguous (unshuffled) k-fold split of `n` rows.
///
/// Fold `i` tests on rows `[i·n/k, (i+1)·n/k)`; the last fold also takes the
/// remainder.
pub fn k_fold(n: usize, k: usize) -> MlResult<Vec<Fold>> {
    if k < 2 {
        return Err(MlError::parameter(format!("k-fold needs at least 2 folds, got {}", k)));
    }
    if n < k {
        return Err(MlError::degenerate(format!(
            "cannot split {} rows into {} folds",
            n, k
        )));
    }
    let fold_len = n / k;
    Ok((0..k)
        .map(|i| {
            let start = i * fold_len;
            let end = if i + 1 == k { n } else { start + fold_len };
            Fold {
                train: (0..start).chain(end..n).collect(),
                test: (start..end).collect(),
            }
        })
        .collect())
}
