pub mod liveness;

pub use liveness::Liveness;
