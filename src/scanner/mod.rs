//! Directory scanning

pub mod directory;
pub mod files;

pub use directory::DirectoryScanner;
