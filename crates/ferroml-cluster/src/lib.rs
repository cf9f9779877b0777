//! Clustering: k-means, Gaussian mixtures fitted by EM, and mean shift.

pub mod gaussian_mixture;
pub mod init;
pub mod kmeans;
pub mod mean_shift;

pub use gaussian_mixture::*;
pub use init::*;
pub use kmeans::*;
pub use mean_shift::*;
