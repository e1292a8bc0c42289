//! Rule Emitter (C4).
//!
//! Produces byte-exact kernel hotplug rules that create stable symlinks
//! keyed by physical USB port (spec.md §4.4).

use std::path::Path;

use crate::error::RuleEmitError;
use crate::topology::is_port_path;

#[derive(Debug, Clone)]
pub struct PortRule {
    pub port_path: String,
    pub bus_num: i64,
    pub dev_num: i64,
}

/// An injectable command runner for the optional reload-and-trigger step.
/// Production code runs `udevadm control --reload && udevadm trigger`;
/// tests substitute a recording stub.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<()>;
}

pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<()> {
        std::process::Command::new(program).args(args).status()?;
        Ok(())
    }
}

/// Reloads the kernel's hotplug rule database and re-triggers it against
/// already-connected devices, so a freshly written rule file takes effect
/// without a reboot. Optional per spec.md §4.4 — the operator may defer
/// this and apply it out of band instead.
pub fn reload_and_trigger(runner: &dyn CommandRunner) -> std::io::Result<()> {
    runner.run("udevadm", &["control", "--reload"])?;
    runner.run("udevadm", &["trigger"])?;
    Ok(())
}

fn validate(rule: &PortRule) -> Result<(), RuleEmitError> {
    if !is_port_path(&rule.port_path) {
        return Err(RuleEmitError::InvalidPort(rule.port_path.clone()));
    }
    if rule.bus_num <= 0 || rule.dev_num <= 0 {
        return Err(RuleEmitError::NonPositive {
            bus: rule.bus_num,
            dev: rule.dev_num,
        });
    }
    Ok(())
}

/// Renders a single rule line, exactly five comma-space-separated clauses.
pub fn render_line(rule: &PortRule) -> Result<String, RuleEmitError> {
    validate(rule)?;
    Ok(format!(
        "SUBSYSTEM==\"sound\", KERNEL==\"controlC[0-9]*\", ATTRS{{busnum}}==\"{}\", ATTRS{{devnum}}==\"{}\", SYMLINK+=\"snd/by-usb-port/{}\"",
        rule.bus_num, rule.dev_num, rule.port_path,
    ))
}

const HEADER: &str = "# Generated by streamd — do not edit by hand\n";

/// Renders the full rule file contents: header comment, one rule per line,
/// single trailing newline, no blank lines between rules.
pub fn render_rule_file(rules: &[PortRule]) -> Result<String, RuleEmitError> {
    let mut out = String::from(HEADER);
    for rule in rules {
        out.push_str(&render_line(rule)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_rule_file(path: &Path, rules: &[PortRule]) -> Result<(), RuleEmitError> {
    let contents = render_rule_file(rules)?;
    std::fs::write(path, contents).map_err(|source| RuleEmitError::Io {
        path: path.to_path_buf(),
        source,
    })
}
