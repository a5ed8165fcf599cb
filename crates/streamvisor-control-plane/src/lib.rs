pub mod features;
pub mod shared;
