use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use siaran::audience::AudienceNormalizer;
use siaran::config::Config;

/// Normalize a pasted recipient list from a file or stdin (`-`)
pub fn normalize(config: &Config, input: &Path, json: bool) -> Result<()> {
    let raw = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read input: {}", input.display()))?
    };

    let audience = AudienceNormalizer::new(&config.audience).normalize_text(&raw);

    if json {
        println!("{}", serde_json::to_string_pretty(&audience)?);
        return Ok(());
    }

    for address in &audience.valid {
        println!("{address}");
    }
    eprintln!(
        "{} valid, {} invalid",
        audience.valid.len(),
        audience.invalid.len()
    );
    for token in &audience.invalid {
        eprintln!("  invalid: {token}");
    }
    Ok(())
}
