//! Classification and regression trees with weakest-link (cost-complexity)
//! pruning and cross-validated choice of the pruning strength.

mod builder;
pub mod config;
pub mod decision_tree;
pub mod fit;

pub use config::*;
pub use decision_tree::*;
pub use fit::*;
