#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sandbox")]
pub(crate) mod sandbox;
