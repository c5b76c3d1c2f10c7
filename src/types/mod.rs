pub mod address;
pub mod cluster;
pub mod member;

pub use address::*;
pub use cluster::*;
pub use member::*;
