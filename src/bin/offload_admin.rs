//! Offline operator tool for inspecting and cleaning offload directories.
//!
//! Works purely on the on-disk cold form; no running server is required.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use vecwarden::offload::{OffloadStore, read_vectors};

#[derive(Parser)]
#[command(
    name = "offload-admin",
    about = "Inspect and clean Vecwarden offload directories"
)]
struct Cli {
    /// Offload directory to operate on.
    #[arg(long, default_value = "./offload")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tabulate every offloaded index in the directory.
    List {
        /// Restrict the listing to one namespace.
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Show one descriptor and verify its binary vectors file.
    Inspect {
        /// Index identifier (including any namespace prefix).
        #[arg(long)]
        id: String,
    },
    /// Delete the cold files of one offloaded index.
    Delete {
        /// Index identifier (including any namespace prefix).
        #[arg(long)]
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = OffloadStore::new(&cli.dir)
        .with_context(|| format!("failed to open offload directory {}", cli.dir.display()))?;

    match cli.command {
        Command::List { namespace } => list(&store, namespace.as_deref()),
        Command::Inspect { id } => inspect(&store, &id),
        Command::Delete { id } => delete(&store, &id),
    }
}

fn list(store: &OffloadStore, namespace: Option<&str>) -> Result<()> {
    let descriptors = store.list(namespace);
    if descriptors.is_empty() {
        println!("no offloaded indices");
        return Ok(());
    }

    println!("{:<32} {:>10} {:>10} {:<24}", "id", "documents", "dimension", "offloaded at");
    for metadata in descriptors {
        println!(
            "{:<32} {:>10} {:>10} {:<24}",
            metadata.id,
            metadata.document_count,
            metadata
                .embedding_dimension
                .map(|dimension| dimension.to_string())
                .unwrap_or_else(|| "-".to_string()),
            metadata.offloaded_at,
        );
    }
    Ok(())
}

fn inspect(store: &OffloadStore, id: &str) -> Result<()> {
    let metadata = store
        .read_metadata(id)
        .with_context(|| format!("no descriptor for '{id}'"))?;

    println!("id:            {}", metadata.id);
    println!("created:       {}", metadata.created);
    println!("offloaded at:  {}", metadata.offloaded_at);
    println!("documents:     {}", metadata.document_count);
    println!(
        "format:        {}",
        metadata.format.as_deref().unwrap_or("legacy-json")
    );

    if let Some(vectors_file) = &metadata.vectors_file {
        let path = store.dir().join(vectors_file);
        let mut reader = BufReader::new(
            File::open(&path).with_context(|| format!("missing vectors file {}", path.display()))?,
        );
        let vectors = read_vectors(&mut reader).context("vectors file is malformed")?;
        println!(
            "vectors:       {} entries, dimension {}",
            vectors.entries.len(),
            vectors.dimension
        );
        if let Some(declared) = metadata.embedding_dimension
            && declared != vectors.dimension
            && !vectors.entries.is_empty()
        {
            bail!(
                "descriptor declares dimension {declared} but vectors file carries {}",
                vectors.dimension
            );
        }
    } else {
        println!("vectors:       none (legacy descriptor)");
    }
    Ok(())
}

fn delete(store: &OffloadStore, id: &str) -> Result<()> {
    if store.delete(id)? {
        println!("deleted '{id}'");
    } else {
        println!("nothing to delete for '{id}'");
    }
    Ok(())
}
