pub mod ols;
pub mod ridge;
pub mod press;
pub mod recursive;
pub mod logistic;
pub mod lars;

pub use ols::*;
pub use ridge::*;
pub use press::*;
pub use recursive::*;
pub use logistic::*;
pub use lars::*;
