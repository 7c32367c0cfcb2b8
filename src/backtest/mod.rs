pub mod engine;
pub mod report;

pub use engine::*;
pub use report::*;
