use std::process::Command;

// Embed the source revision so the server banner can report exactly what
// is running. Builds outside a git checkout fall back to "unknown".
fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", git_describe());
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}

fn git_describe() -> String {
    let hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    let Some(hash) = hash else {
        return "unknown".to_string();
    };

    let dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .map(|s| !s.success())
        .unwrap_or(false);

    if dirty {
        format!("{hash}-dirty")
    } else {
        hash
    }
}
