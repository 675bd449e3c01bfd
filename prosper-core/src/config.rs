//! Resource/binary path resolution and the optional TOML config overlay.
//!
//! Mirrors the teacher's `VulkanRenderer` reading a `config::Config`
//! layered over environment variables rather than hardcoding paths —
//! `RES_PATH` and `BIN_PATH` locate shader/texture assets and the
//! compiled binary's own directory respectively.

use std::env;
use std::path::PathBuf;

/// Resolved asset and binary directories for this run.
#[derive(Debug, Clone)]
pub struct Paths {
    pub res_path: PathBuf,
    pub bin_path: PathBuf,
}

/// Reads `RES_PATH`/`BIN_PATH` from the environment, falling back to the
/// current executable's directory (`bin_path`) and a sibling `res/`
/// directory (`res_path`) when unset.
pub fn paths() -> Paths {
    let bin_path = env::var_os("BIN_PATH").map(PathBuf::from).unwrap_or_else(|| {
        env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let res_path = env::var_os("RES_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| bin_path.join("res"));

    Paths { res_path, bin_path }
}

/// Layers an optional `prosper.toml` in the current directory over the
/// `config` crate's environment-variable source, the same two-source
/// setup the teacher's `main.rs` builds for its renderer settings.
pub fn load_overlay() -> config::Config {
    let mut builder = config::Config::builder();
    builder = builder.add_source(config::File::with_name("prosper").required(false));
    builder = builder.add_source(config::Environment::with_prefix("PROSPER"));
    builder
        .build()
        .unwrap_or_else(|e| {
            log::warn!("failed to build config overlay, using defaults: {e}");
            config::Config::default()
        })
}
