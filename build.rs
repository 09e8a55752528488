use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=icon.ico");

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        embed_resources();
    }

    // Copy README to release folder
    let out_dir = std::env::var("OUT_DIR").unwrap_or_default();
    if out_dir.contains("release") {
        let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
            return;
        };
        let src = Path::new(&manifest_dir).join("README.md");
        let target_dir = Path::new(&manifest_dir).join("target").join("release");

        if src.exists() {
            let _ = fs::create_dir_all(&target_dir);
            let _ = fs::copy(&src, target_dir.join("README.md"));
        }
    }
}

/// Embeds the tray icon (resource ID 1) into the EXE
#[cfg(windows)]
fn embed_resources() {
    let mut res = winres::WindowsResource::new();
    if Path::new("icon.ico").exists() {
        res.set_icon("icon.ico");
    }
    if let Err(e) = res.compile() {
        println!("cargo:warning=could not embed Windows resources: {}", e);
    }
}

/// Cross-compiling from a non-Windows host: the tray falls back to the stock icon
#[cfg(not(windows))]
fn embed_resources() {}
