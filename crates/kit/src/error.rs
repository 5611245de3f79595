//! Distinguished failure kinds of the VirtualBox driver
//!
//! Most errors are plain `eyre` reports with context attached. The variants
//! here are the ones callers need to tell apart (for example `rm` treating a
//! missing machine as already removed), so they are raised as a concrete
//! type and recovered with [`VBoxError::matches`].

use std::net::Ipv4Addr;
use std::time::Duration;

use color_eyre::Report;

/// Errors a caller may want to react to programmatically
#[derive(Debug, thiserror::Error)]
pub enum VBoxError {
    /// The VBoxManage binary could not be located or executed
    #[error("VBoxManage not found. Make sure VirtualBox is installed and VBoxManage is in the path")]
    ToolNotFound,

    /// VBoxManage ran but reported a failure
    #[error("{command} failed:\n{stderr}")]
    CommandFailed {
        /// Full command line that was invoked
        command: String,
        /// Captured standard error
        stderr: String,
    },

    /// The named VM is not registered with VirtualBox
    #[error("machine does not exist")]
    MachineNotExist,

    /// An operation needing a running guest was attempted on a stopped one
    #[error("Host is not running")]
    HostNotRunning,

    /// Two host-only interfaces share one network name
    #[error("VirtualBox is configured with multiple host-only adapters with the same name {0:?}. Please remove one.")]
    DuplicateNetworkName(String),

    /// Two host-only interfaces share one IPv4 address
    #[error("VirtualBox is configured with multiple host-only adapters with the same IP \"{0}\". Please remove one.")]
    DuplicateNetworkIp(Ipv4Addr),

    /// `hostonlyif create` did not report the new interface name
    #[error("failed to create hostonly interface")]
    HostOnlyCreateFailed,

    /// The interface was reported as created but cannot be listed
    #[error("The host-only adapter we just created is not visible. This is a well known VirtualBox bug. You might want to uninstall it and reinstall at least version 5.0.12 that is is supposed to fix this issue")]
    HostOnlyNotVisible,

    /// No local TCP port could be bound
    #[error("unable to allocate tcp port")]
    NoAvailablePort,

    /// The configured host-only CIDR names a network instead of a host
    #[error("host-only cidr must be specified with a host address, not a network address")]
    NetworkAddressCidr,

    /// No address distinct from the base address could be drawn
    #[error("unable to generate random IP")]
    RandomIpUnavailable,

    /// A polling loop gave up
    #[error("timed out after {}s waiting for {what}", waited.as_secs())]
    Timeout {
        /// What was being waited for
        what: String,
        /// How long we waited
        waited: Duration,
    },

    /// The installed VirtualBox is too old
    #[error("We support Virtualbox starting with version 5. Your VirtualBox install is {0:?}. Please upgrade at https://www.virtualbox.org")]
    UnsupportedVersion(String),

    /// The guest did not report an address on the private interface
    #[error("No IP address found {0}")]
    NoGuestIp(String),
}

impl VBoxError {
    /// Test whether `err` carries a [`VBoxError`] satisfying `pred`.
    pub fn matches(err: &Report, pred: impl Fn(&VBoxError) -> bool) -> bool {
        err.downcast_ref::<VBoxError>().is_some_and(pred)
    }

    /// Shorthand for the "machine does not exist" check used by remove and state.
    pub fn is_machine_not_exist(err: &Report) -> bool {
        Self::matches(err, |e| matches!(e, VBoxError::MachineNotExist))
    }
}
