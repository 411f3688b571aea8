//! Per-project build adapters for the evaluation harness.
//!
//! Each adapter encodes one target project's configure/build/clean
//! invocations, its configuration option pool, and its alarm list (generated
//! files known to invalidate prediction), behind the shared
//! [`BuildAdapter`] trait.
//!
//! Supported projects:
//! - `openssl` — `./config` + make, randomized `-no-*` feature pool
//! - `sqlite` — autoconf build without amalgamation, `--enable/--disable` pool
//! - `bochs` — autoconf build in the `bochs/` subtree, with consistency
//!   rules between dependent options
//! - `linux` — named kernel configs (tinyconfig, defconfig, randconfig)

use impact_eval_core::BuildAdapter;

pub mod bochs;
pub mod linux;
pub mod openssl;
pub mod sqlite;

mod support;

pub use bochs::BochsAdapter;
pub use linux::LinuxAdapter;
pub use openssl::OpensslAdapter;
pub use sqlite::SqliteAdapter;

/// Names accepted by [`create`], sorted.
pub const KNOWN_PROJECTS: &[&str] = &["bochs", "linux", "openssl", "sqlite"];

/// Instantiate the adapter registered under `name`.
pub fn create(name: &str) -> Option<Box<dyn BuildAdapter>> {
    match name {
        "bochs" => Some(Box::new(BochsAdapter)),
        "linux" => Some(Box::new(LinuxAdapter::new())),
        "openssl" => Some(Box::new(OpensslAdapter)),
        "sqlite" => Some(Box::new(SqliteAdapter)),
        _ => None,
    }
}
