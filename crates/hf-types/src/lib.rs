pub mod errors;
pub mod individual;
pub mod parameter;

pub use errors::*;
pub use individual::*;
pub use parameter::*;
