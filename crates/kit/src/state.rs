//! Power state of a VirtualBox VM

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static VM_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^VMState="(\w+)"\r?$"#).expect("valid regex"));
static MACHINE_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Could not find a registered machine named '(.+)'").expect("valid regex")
});

/// Coarse power state derived from `VMState` in `showvminfo --machinereadable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// Unknown or unreported
    None,
    /// Powered off or aborted
    Stopped,
    /// Saved to disk
    Saved,
    /// Paused in memory
    Paused,
    /// Running
    Running,
    /// The state could not be determined
    Error,
}

impl VmState {
    /// Map a raw `VMState` token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "running" => VmState::Running,
            "paused" => VmState::Paused,
            "saved" => VmState::Saved,
            "poweroff" | "aborted" => VmState::Stopped,
            _ => VmState::None,
        }
    }

    /// Extract the state from full `showvminfo --machinereadable` output.
    pub fn from_vminfo(stdout: &str) -> Self {
        VM_STATE
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map_or(VmState::None, |m| Self::from_token(m.as_str()))
    }
}

/// Whether VBoxManage stderr says the machine is not registered.
pub fn is_machine_not_found(stderr: &str) -> bool {
    MACHINE_NOT_FOUND.is_match(stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        let cases = [
            (r#"VMState="running""#, VmState::Running),
            (r#"VMState="paused""#, VmState::Paused),
            (r#"VMState="saved""#, VmState::Saved),
            (r#"VMState="poweroff""#, VmState::Stopped),
            (r#"VMState="aborted""#, VmState::Stopped),
            (r#"VMState="whatever""#, VmState::None),
            ("VMState=", VmState::None),
            ("", VmState::None),
        ];
        for (stdout, expected) in cases {
            assert_eq!(VmState::from_vminfo(stdout), expected, "{stdout}");
        }
    }

    #[test]
    fn test_state_among_other_fields() {
        let stdout = "name=\"default\"\nVMState=\"running\"\nVMStateChangeTime=\"2024-01-01T00:00:00\"\n";
        assert_eq!(VmState::from_vminfo(stdout), VmState::Running);
    }

    #[test]
    fn test_machine_not_found() {
        assert!(is_machine_not_found(
            "VBoxManage: error: Could not find a registered machine named 'unknown'"
        ));
        assert!(!is_machine_not_found("VBoxManage: error: something else"));
    }

    #[test]
    fn test_display() {
        assert_eq!(VmState::Running.to_string(), "running");
        assert_eq!(VmState::Stopped.to_string(), "stopped");
    }
}
