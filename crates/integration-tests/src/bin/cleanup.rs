//! Cleanup utility for integration test resources
//!
//! This binary powers off and deletes VirtualBox machines left behind by
//! integration tests that were interrupted.

use std::sync::LazyLock;

use color_eyre::Result;
use integration_tests::is_test_machine;
use regex::Regex;
use vboxkit::vboxmanage::{VBoxManage, VBoxManageCmd};

static VM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"(.+)" \{[0-9a-fA-F-]+\}$"#).expect("valid regex"));

fn test_machines(vbox: &dyn VBoxManage) -> Result<Vec<String>> {
    let out = vbox.run(&["list", "vms"])?;
    Ok(out
        .lines()
        .filter_map(|l| VM_LINE.captures(l.trim()))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| is_test_machine(name))
        .collect())
}

fn cleanup_test_machines() -> Result<usize> {
    println!("Cleaning up integration test machines...");
    let vbox = VBoxManageCmd::detect();
    let machines = test_machines(&vbox)?;
    if machines.is_empty() {
        println!("No integration test machines found to clean up");
        return Ok(0);
    }

    println!(
        "Found {} integration test machine(s) to clean up",
        machines.len()
    );
    let mut cleaned = 0;
    for name in machines {
        print!("  Removing {name}... ");
        // Already powered off is fine.
        let _ = vbox.exec(&["controlvm", &name, "poweroff"]);
        match vbox.exec(&["unregistervm", "--delete", &name]) {
            Ok(()) => {
                println!("✓");
                cleaned += 1;
            }
            Err(e) => {
                println!("✗ (failed)");
                eprintln!("    Error: {e}");
            }
        }
    }
    Ok(cleaned)
}

fn main() {
    match cleanup_test_machines() {
        Ok(n) => println!("Cleanup completed: {n} machine(s) removed"),
        Err(e) => {
            eprintln!("Error during machine cleanup: {e:?}");
            std::process::exit(1);
        }
    }
}
