//! Drive VirtualBox machines through `VBoxManage`.
//!
//! The [`driver::Driver`] type implements the machine lifecycle; the
//! remaining modules are the pieces it is built from and can be used on
//! their own.

pub mod bootimage;
pub mod cidr;
pub mod cmdext;
pub mod common_opts;
pub mod config;
pub mod dhcp;
pub mod driver;
pub mod error;
pub mod kvparse;
pub mod machine;
pub mod network;
pub mod poll;
pub mod portfwd;
pub mod ssh;
pub mod state;
pub mod store;
pub mod vboxmanage;
pub mod vminfo;

#[cfg(test)]
pub(crate) mod testutil;
