//! Line-oriented key/value parsing of VBoxManage output
//!
//! VBoxManage speaks two loosely specified grammars: `Key:   value` for the
//! `list` subcommands and `"Key"="Value"` / `Key=Value` for
//! `showvminfo --machinereadable`. Lines matching neither shape (banners,
//! blank separators, progress output) are skipped rather than rejected.

use std::ops::ControlFlow;
use std::sync::LazyLock;

use color_eyre::Result;
use regex::Regex;

// Greedy key: a value containing `: ` splits at its last occurrence.
static COLON_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+):\s+(.*)$").expect("valid regex"));
static EQUALS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"?([^"=]+)"?="?(.*?)"?$"#).expect("valid regex"));

/// Which line grammar to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// `Key:` followed by whitespace then the value; the key extends to
    /// the last such separator on the line
    Colon,
    /// Optionally quoted key, `=`, optionally quoted value
    Equals,
}

impl LineFormat {
    fn regex(self) -> &'static Regex {
        match self {
            LineFormat::Colon => &COLON_LINE,
            LineFormat::Equals => &EQUALS_LINE,
        }
    }

    /// Split one line into key and value, if it has this shape.
    pub fn split_line(self, line: &str) -> Option<(&str, &str)> {
        let caps = self.regex().captures(line)?;
        let key = caps.get(1)?.as_str();
        let val = caps.get(2).map_or("", |m| m.as_str());
        Some((key, val))
    }
}

/// Feed every well-formed line of `text` to `on_kv`, in order.
///
/// The callback returns `ControlFlow::Break` to stop early; an error from the
/// callback stops parsing and is returned unchanged.
pub fn parse_key_values<F>(text: &str, format: LineFormat, mut on_kv: F) -> Result<()>
where
    F: FnMut(&str, &str) -> Result<ControlFlow<()>>,
{
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((key, val)) = format.split_line(line) else {
            continue;
        };
        if on_kv(key, val)?.is_break() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use indoc::indoc;

    fn collect(text: &str, format: LineFormat) -> Vec<(String, String)> {
        let mut out = Vec::new();
        parse_key_values(text, format, |k, v| {
            out.push((k.to_string(), v.to_string()));
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        out
    }

    #[test]
    fn test_colon_lines_skip_noise() {
        let text = indoc! {"
            Oracle VM VirtualBox Command Line Management Interface

            Name:            vboxnet0
            not a key value line
            HardwareAddress: 0a:00:27:00:00:00
            IPV6Address:
            VBoxNetworkName: HostInterfaceNetworking-vboxnet0
        "};
        assert_eq!(
            collect(text, LineFormat::Colon),
            vec![
                ("Name".into(), "vboxnet0".into()),
                ("HardwareAddress".into(), "0a:00:27:00:00:00".into()),
                (
                    "VBoxNetworkName".into(),
                    "HostInterfaceNetworking-vboxnet0".into()
                ),
            ]
        );
    }

    #[test]
    fn test_colon_key_is_greedy() {
        assert_eq!(
            LineFormat::Colon.split_line("Name: foo: bar"),
            Some(("Name: foo", "bar"))
        );
        assert_eq!(
            LineFormat::Colon.split_line("HardwareAddress: 0a:00:27:00:00:00"),
            Some(("HardwareAddress", "0a:00:27:00:00:00"))
        );
    }

    #[test]
    fn test_equals_lines_quoted_and_bare() {
        let text = indoc! {r#"
            name="default"
            memory=1024
            "SATA-1-0"="/home/x/disk.vmdk"
            Forwarding(0)="ssh,tcp,127.0.0.1,50022,,22"
            garbage
            VMState=
        "#};
        assert_eq!(
            collect(text, LineFormat::Equals),
            vec![
                ("name".into(), "default".into()),
                ("memory".into(), "1024".into()),
                ("SATA-1-0".into(), "/home/x/disk.vmdk".into()),
                ("Forwarding(0)".into(), "ssh,tcp,127.0.0.1,50022,,22".into()),
                ("VMState".into(), "".into()),
            ]
        );
    }

    #[test]
    fn test_crlf_output() {
        let text = "cpus=2\r\nmemory=512\r\n";
        assert_eq!(
            collect(text, LineFormat::Equals),
            vec![
                ("cpus".into(), "2".into()),
                ("memory".into(), "512".into())
            ]
        );
    }

    #[test]
    fn test_early_stop_and_error() {
        let mut seen = 0;
        parse_key_values("a=1\nb=2\nc=3\n", LineFormat::Equals, |_, _| {
            seen += 1;
            Ok(if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })
        .unwrap();
        assert_eq!(seen, 2);

        let err = parse_key_values("a=1\nb=2\n", LineFormat::Equals, |k, _| {
            if k == "b" {
                Err(eyre!("bad key {k}"))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "bad key b");
    }

    #[test]
    fn test_malformed_only_input_is_not_an_error() {
        assert!(collect("\n\n???\nno separators here\n", LineFormat::Colon).is_empty());
        assert!(collect("just text\n", LineFormat::Equals).is_empty());
    }
}
