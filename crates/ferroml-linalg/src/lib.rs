pub mod decomposition;
pub mod solve;
pub mod stats;

pub use decomposition::*;
pub use solve::*;
pub use stats::*;
