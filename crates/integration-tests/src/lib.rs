//! Shared library code for integration tests
//!
//! This module contains constants and utilities that are shared between
//! the main test binary and helper binaries like cleanup.

// Unfortunately needed here to work with linkme
#![allow(unsafe_code)]

use linkme::distributed_slice;

/// Prefix of every machine created by integration tests
pub const TEST_MACHINE_PREFIX: &str = "vboxkit-itest-";

/// A test function that returns a Result
pub type TestFn = fn() -> color_eyre::Result<()>;

/// Metadata for a registered integration test
#[derive(Debug)]
pub struct IntegrationTest {
    /// Name of the integration test
    pub name: &'static str,
    /// Test function to execute
    pub f: TestFn,
    /// Whether the test needs a working VirtualBox installation
    pub needs_virtualbox: bool,
}

impl IntegrationTest {
    /// Create a new integration test with the given name and function
    pub const fn new(name: &'static str, f: TestFn, needs_virtualbox: bool) -> Self {
        Self {
            name,
            f,
            needs_virtualbox,
        }
    }
}

/// Distributed slice holding all registered integration tests
#[distributed_slice]
pub static INTEGRATION_TESTS: [IntegrationTest];

/// Register an integration test with less boilerplate.
///
/// Tests registered with `vbox` are ignored when VirtualBox is not installed.
///
/// # Examples
///
/// ```ignore
/// fn test_help() -> Result<()> {
///     let output = run_vboxkit(&["--help"])?;
///     output.assert_success("help");
///     Ok(())
/// }
/// integration_test!(test_help);
/// integration_test!(vbox test_lifecycle);
/// ```
#[macro_export]
macro_rules! integration_test {
    ($fn_name:ident) => {
        ::paste::paste! {
            #[::linkme::distributed_slice($crate::INTEGRATION_TESTS)]
            static [<$fn_name:upper>]: $crate::IntegrationTest =
                $crate::IntegrationTest::new(stringify!($fn_name), $fn_name, false);
        }
    };
    (vbox $fn_name:ident) => {
        ::paste::paste! {
            #[::linkme::distributed_slice($crate::INTEGRATION_TESTS)]
            static [<$fn_name:upper>]: $crate::IntegrationTest =
                $crate::IntegrationTest::new(stringify!($fn_name), $fn_name, true);
        }
    };
}

/// A fresh machine name carrying [`TEST_MACHINE_PREFIX`].
pub fn test_machine_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{TEST_MACHINE_PREFIX}{}", &id[..8])
}

/// Whether `name` was created by an integration test.
pub fn is_test_machine(name: &str) -> bool {
    name.starts_with(TEST_MACHINE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_names() {
        let a = test_machine_name();
        assert!(is_test_machine(&a));
        assert_ne!(a, test_machine_name());
        assert!(!is_test_machine("default"));
    }
}
