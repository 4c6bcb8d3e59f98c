pub mod reconstruct;

pub use reconstruct::{reconstruct, ReconstructReport, ReconstructSettings};
