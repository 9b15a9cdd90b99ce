pub mod error;

pub use error::SegError;
