//! Shell-style rendering of command lines for traces and labels.

use std::sync::LazyLock;

use regex::Regex;

use crate::context::Env;

static UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_@%+=:,./-]").expect("static pattern"));

/// Quote `arg` for safe use in a POSIX shell.
pub fn quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !UNSAFE.is_match(arg) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Join arguments with quoting applied to each.
pub fn join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a command with its environment overrides, `K=V` pairs first.
pub fn render<S: AsRef<str>>(env: Option<&Env>, args: &[S]) -> String {
    let mut line = String::new();
    for (key, value) in env.into_iter().flatten() {
        line.push_str(key);
        line.push('=');
        line.push_str(&quote(value));
        line.push(' ');
    }
    line.push_str(&join(args));
    line
}
