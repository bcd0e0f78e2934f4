use std::ffi::OsString;

use anyhow::{Context, Result};

fn main() -> Result<()> {
    let version = env("CARGO_PKG_VERSION")?
        .into_string()
        .map_err(|v| anyhow::anyhow!("CARGO_PKG_VERSION is not UTF-8: {v:?}"))?;
    let rustc = rustc_version::version().context("failed to query rustc version")?;

    println!("cargo:rustc-env=GATEWAY_VERSION={version}");
    println!("cargo:rustc-env=GATEWAY_RUSTC_VERSION={rustc}");
    Ok(())
}

fn env(key: &str) -> Result<OsString> {
    println!("cargo:rerun-if-env-changed={key}");
    std::env::var_os(key).with_context(|| format!("missing '{key}' environment variable"))
}
