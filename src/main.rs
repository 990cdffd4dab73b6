use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use ntfs_inspect::inspect::Inspector;

/// Read-only inspector for NTFS volume images.
#[derive(Parser, Debug)]
#[command(name = "ntfs-inspect", version, about)]
struct Cli {
    /// Path to an NTFS volume image or block device (opened read-only)
    image: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut inspector = Inspector::open_path(&cli.image)
        .with_context(|| format!("cannot open {}", cli.image.display()))?;
    inspector.run()?;
    Ok(())
}
