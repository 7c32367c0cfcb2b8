pub mod ensemble;
pub mod features;
pub mod store;

pub use ensemble::*;
pub use features::*;
pub use store::*;
