//! Info command implementation.

use acoustic_model::FastPitchConfig;
use anyhow::Result;
use tts_core::RuntimeConfig;

/// Run the info command.
pub fn run() -> Result<()> {
    println!("FastPitch Rust Engine");
    println!("=====================");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Build info:");
    println!("  Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));

    #[cfg(feature = "cuda")]
    println!("  CUDA: enabled");
    #[cfg(not(feature = "cuda"))]
    println!("  CUDA: disabled");

    #[cfg(feature = "metal")]
    println!("  Metal: enabled");
    #[cfg(not(feature = "metal"))]
    println!("  Metal: disabled");

    println!();
    println!("Crates:");
    println!("  tts-core: Errors, configuration, prosody types and hooks");
    println!("  acoustic-model: FastPitch layers, alignment and inference");
    println!("  runtime: Logging, device selection and inference sessions");
    println!("  tts-cli: This CLI tool");
    println!();
    println!("Default runtime config:");
    println!("{}", serde_json::to_string_pretty(&RuntimeConfig::default())?);
    println!();
    println!("Default architecture:");
    println!("{}", serde_json::to_string_pretty(&FastPitchConfig::default())?);
    Ok(())
}
