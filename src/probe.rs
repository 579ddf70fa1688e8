//! Best-effort discovery of machine properties.
//!
//! Every probe runs through [`probe_read`], which retries one layer down
//! (see [`Machine::unshell`]) while the answer is "not found". This lets a
//! [`crate::Shell`] override a probe command for tests while still reaching
//! the real backend otherwise.

use std::io;
use std::sync::Arc;

use crate::context::Context;
use crate::error;
use crate::exec;
use crate::machine::Machine;

/// Read the trimmed output of `args`, descending through wrapped machines
/// while the command is not found.
///
/// Any other failure is returned as-is from the layer that produced it.
pub fn probe_read(ctx: &Context, m: &dyn Machine, args: &[&str]) -> io::Result<String> {
    let mut layer: Option<Arc<dyn Machine>> = None;
    loop {
        let current: &dyn Machine = match &layer {
            Some(inner) => &**inner,
            None => m,
        };
        match exec::read(ctx, current, args) {
            Err(e) if error::not_found(&e) => match current.unshell() {
                Some(inner) => {
                    tracing::debug!(command = ?args, "not found, retrying one layer down");
                    layer = Some(inner);
                }
                None => return Err(e),
            },
            result => return result,
        }
    }
}

/// The operating system of `m`, normalized to Go-style names such as
/// `linux`, `darwin` or `windows`.
///
/// Uses [`Machine::os`] when it answers, otherwise probes with commands.
/// Returns `"unknown"` when nothing answers.
pub fn os(ctx: &Context, m: &dyn Machine) -> String {
    if let Some(os) = m.os(ctx).filter(|os| !os.is_empty()) {
        return os;
    }
    detect_os(ctx, m)
}

fn detect_os(ctx: &Context, m: &dyn Machine) -> String {
    if let Ok(out) = probe_read(ctx, m, &["uname", "-s"]) {
        let os = out.trim().to_lowercase();
        if os.contains("msys_nt") {
            return "windows".to_string();
        }
        return os;
    }
    match probe_read(ctx, m, &["cmd", "/c", "ver"]) {
        Ok(out) if out.to_lowercase().contains("windows") => "windows".to_string(),
        _ => "unknown".to_string(),
    }
}

/// The architecture of `m`: `amd64`, `arm64`, `386`, `arm` or `unknown`.
///
/// Uses [`Machine::arch`] when it answers, otherwise probes with commands.
pub fn arch(ctx: &Context, m: &dyn Machine) -> String {
    if let Some(arch) = m.arch(ctx).filter(|arch| !arch.is_empty()) {
        return arch;
    }
    detect_arch(ctx, m)
}

fn detect_arch(ctx: &Context, m: &dyn Machine) -> String {
    // `uname -m` reports the translated architecture under Rosetta; the
    // kernel version string names the hardware.
    if os(ctx, m) == "darwin" {
        if let Ok(version) = probe_read(ctx, m, &["uname", "-v"]) {
            let version = version.to_uppercase();
            if version.contains("ARM64") {
                return "arm64".to_string();
            }
            if version.contains("X86_64") {
                return "amd64".to_string();
            }
        }
    }

    if let Ok(out) = probe_read(ctx, m, &["uname", "-m"]) {
        return normalize_arch(out.trim()).to_string();
    }

    if let Ok(out) = probe_read(ctx, m, &["cmd", "/c", "echo %PROCESSOR_ARCHITECTURE%"]) {
        let arch = out.trim();
        if arch != "%PROCESSOR_ARCHITECTURE%" {
            return normalize_arch(arch).to_string();
        }
    }

    if let Ok(out) = probe_read(
        ctx,
        m,
        &["powershell", "Write-Output", "$env:PROCESSOR_ARCHITECTURE"],
    ) {
        return normalize_arch(out.trim()).to_string();
    }

    "unknown".to_string()
}

/// Map a machine name as reported by `uname -m` or Windows onto the
/// normalized set.
pub fn normalize_arch(arch: &str) -> &'static str {
    match arch.to_lowercase().as_str() {
        "x86_64" | "x86-64" | "x64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        "i386" | "i486" | "i586" | "i686" | "x86" => "386",
        "armv7l" | "armv6l" | "arm" => "arm",
        _ => "unknown",
    }
}

/// The value of the environment variable `key`.
///
/// The context overrides are consulted first, then the machine. Returns an
/// empty string when the variable is unset.
pub fn env(ctx: &Context, m: &dyn Machine, key: &str) -> String {
    if let Some(value) = ctx.env(key) {
        return value.to_string();
    }

    if os(ctx, m) == "windows" {
        let script = format!("Write-Output $env:{}", key);
        if let Ok(out) = probe_read(ctx, m, &["powershell", "-Command", &script]) {
            if !out.is_empty() {
                return out;
            }
        }
        let unset = format!("%{}%", key);
        let echo = format!("echo {}", unset);
        if let Ok(out) = probe_read(ctx, m, &["cmd", "/c", &echo]) {
            let value = out.trim();
            if value != unset && !value.is_empty() {
                return value.to_string();
            }
        }
        return String::new();
    }

    probe_read(ctx, m, &["printenv", key]).unwrap_or_default()
}
