// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=FILTER_CAMERA_VERSION");

    // Packaged builds set the version explicitly
    let version = match std::env::var("FILTER_CAMERA_VERSION") {
        Ok(v) => v,
        Err(_) => get_git_version(),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Crate version, with the short commit hash appended when built from git
///
/// Commits after the last tag are marked `-dirty-<hash>`.
fn get_git_version() -> String {
    let crate_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    let described = git(&["describe", "--tags", "--match", "v*"]);
    match (described, git(&["rev-parse", "--short", "HEAD"])) {
        (Some(described), Some(hash)) => {
            let described = described.strip_prefix('v').unwrap_or(&described);
            match described.split_once('-') {
                Some((tag, _)) => format!("{}-dirty-{}", tag, hash),
                None => format!("{}-{}", described, hash),
            }
        }
        (None, Some(hash)) => format!("{}-{}", crate_version, hash),
        _ => crate_version,
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
