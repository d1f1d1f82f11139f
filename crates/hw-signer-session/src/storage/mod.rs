//! Preference store implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub use memory::MemoryPreferences;

#[cfg(feature = "file")]
pub use file::FilePreferences;
