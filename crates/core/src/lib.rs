pub mod error;
pub mod models;
pub mod series;

pub use error::*;
pub use models::*;
pub use series::*;
