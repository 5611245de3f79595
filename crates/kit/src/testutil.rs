//! Test doubles for the external collaborators

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use color_eyre::{eyre::eyre, Result};

use crate::bootimage::BootImageProvider;
use crate::error::VBoxError;
use crate::ssh::{GuestSsh, SshKeyPair, SshTarget};
use crate::vboxmanage::{VBoxManage, VBoxOutput};

#[derive(Debug, Clone)]
enum Reply {
    Out(String),
    Fail(String),
}

/// Scripted `VBoxManage`: replies are keyed by the space-joined arguments.
///
/// Each key holds a queue; the last reply repeats once the queue drains.
/// Unscripted invocations fail unless the fake is lenient, in which case
/// they succeed with empty output.
#[derive(Debug, Default)]
pub(crate) struct FakeVBoxManage {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    lenient: bool,
}

impl FakeVBoxManage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lenient() -> Self {
        Self {
            lenient: true,
            ..Self::default()
        }
    }

    fn push(self, args: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(args.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn on(self, args: &str, stdout: &str) -> Self {
        self.push(args, Reply::Out(stdout.to_string()))
    }

    pub(crate) fn on_err(self, args: &str, stderr: &str) -> Self {
        self.push(args, Reply::Fail(stderr.to_string()))
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn called(&self, args: &str) -> bool {
        self.calls().iter().any(|c| c == args)
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl VBoxManage for FakeVBoxManage {
    fn run_combined(&self, args: &[&str]) -> Result<VBoxOutput> {
        let key = args.join(" ");
        self.calls.lock().unwrap().push(key.clone());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(Reply::Out(stdout)) => Ok(VBoxOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(Reply::Fail(stderr)) => Err(VBoxError::CommandFailed {
                command: format!("VBoxManage {key}"),
                stderr,
            }
            .into()),
            None if self.lenient => Ok(VBoxOutput::default()),
            None => Err(eyre!("Invalid args: {key}")),
        }
    }
}

/// Guest collaborator that records commands and answers from a table.
#[derive(Debug, Default)]
pub(crate) struct FakeGuest {
    replies: Mutex<HashMap<String, String>>,
    pub(crate) commands: Mutex<Vec<String>>,
    pub(crate) unreachable: bool,
}

impl FakeGuest {
    pub(crate) fn with_ip_output(self, interface: &str, output: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(format!("ip addr show dev {interface}"), output.to_string());
        self
    }
}

impl GuestSsh for FakeGuest {
    fn generate_keypair(&self, dir: &Utf8Path, name: &str) -> Result<SshKeyPair> {
        std::fs::create_dir_all(dir)?;
        let private_key_path = dir.join(name);
        let public_key_path = dir.join(format!("{name}.pub"));
        std::fs::write(&private_key_path, "PRIVATE")?;
        std::fs::write(&public_key_path, "ssh-rsa AAAAfake test\n")?;
        Ok(SshKeyPair {
            private_key_path,
            public_key_path,
        })
    }

    fn is_reachable(&self, _target: &SshTarget) -> bool {
        !self.unreachable
    }

    fn run(&self, _target: &SshTarget, command: &str) -> Result<String> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default())
    }
}

/// Lets a test keep a handle on the fake after handing it to a driver.
impl GuestSsh for Arc<FakeGuest> {
    fn generate_keypair(&self, dir: &Utf8Path, name: &str) -> Result<SshKeyPair> {
        self.as_ref().generate_keypair(dir, name)
    }

    fn is_reachable(&self, target: &SshTarget) -> bool {
        self.as_ref().is_reachable(target)
    }

    fn run(&self, target: &SshTarget, command: &str) -> Result<String> {
        self.as_ref().run(target, command)
    }
}

/// Boot image collaborator that writes a placeholder file.
#[derive(Debug, Default)]
pub(crate) struct FakeBootImage {
    pub(crate) requested: Mutex<Vec<Option<String>>>,
}

impl BootImageProvider for FakeBootImage {
    fn fetch(&self, dest: &Utf8Path, url: Option<&str>) -> Result<()> {
        self.requested
            .lock()
            .unwrap()
            .push(url.map(ToOwned::to_owned));
        std::fs::write(dest, b"iso")?;
        Ok(())
    }
}

impl BootImageProvider for Arc<FakeBootImage> {
    fn fetch(&self, dest: &Utf8Path, url: Option<&str>) -> Result<()> {
        self.as_ref().fetch(dest, url)
    }
}
