pub mod hash;
pub mod params;

pub use hash::BloomHasher;
pub use params::BloomParams;
