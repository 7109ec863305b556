//! Main entry point for the bootpatch-compiler CLI

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

/// Compile an XML patch description into a binary patch artifact
#[derive(Parser)]
#[command(name = "bootpatch-compiler", version, about)]
struct Cli {
    /// The patch description document to compile
    input: PathBuf,

    /// Output file, or an existing directory to place the default name in
    /// (default: the input's base name with a .patch extension)
    output: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if cli.verbose > 0 {
        log::set_max_level(match cli.verbose {
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        });
    } else if cli.quiet {
        log::set_max_level(log::LevelFilter::Error);
    }

    let output = resolve_output(&cli.input, cli.output.as_deref());

    let patch_file = bootpatch::compile_file(&cli.input)
        .with_context(|| format!("failed to compile {}", cli.input.display()))?;

    let file = File::create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    patch_file
        .write_to(&mut writer)
        .with_context(|| format!("failed to write {}", output.display()))?;

    log::info!(
        "compiled {} -> {}",
        cli.input.display(),
        output.display()
    );
    Ok(())
}

/// The input's base name with a .patch extension, placed next to the
/// current directory or inside an explicitly given directory
fn resolve_output(input: &Path, output: Option<&Path>) -> PathBuf {
    let default = input
        .file_stem()
        .map_or_else(|| PathBuf::from("out.patch"), |stem| {
            PathBuf::from(stem).with_extension("patch")
        });
    match output {
        None => default,
        Some(path) if path.is_dir() => path.join(default),
        Some(path) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_name() {
        assert_eq!(
            resolve_output(Path::new("dir/patches.xml"), None),
            PathBuf::from("patches.patch")
        );
    }

    #[test]
    fn test_explicit_output_kept() {
        assert_eq!(
            resolve_output(Path::new("patches.xml"), Some(Path::new("custom.bin"))),
            PathBuf::from("custom.bin")
        );
    }
}
