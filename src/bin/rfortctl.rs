use clap::{Parser, Subcommand};
use rochefort::{Config, StoreRegistry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rfortctl", version, about = "Control CLI for the append-only tag-indexed record store")]
struct Cli {
    /// Root directory; each namespace gets its own subdirectory under it.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Repeat for more detail: -v info, -vv debug, -vvv trace.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a record, optionally tagging it.
    Append {
        namespace: String,
        /// Bytes to reserve beyond the payload length. Defaults to the
        /// payload's exact length (no slack).
        #[arg(long)]
        alloc_size: Option<u32>,
        /// May be repeated; each becomes a separate tag on the record.
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        #[arg(long, conflicts_with = "data")]
        file: Option<PathBuf>,
    },
    /// Overwrite bytes within an already-reserved slot.
    Modify {
        namespace: String,
        offset: u64,
        /// Negative means "append at the current end of valid data".
        #[arg(long, default_value_t = -1)]
        pos: i32,
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        #[arg(long, conflicts_with = "data")]
        file: Option<PathBuf>,
        /// Set the record's valid length to exactly pos + data.len(),
        /// even if that shrinks it.
        #[arg(long)]
        reset_length: bool,
    },
    /// Read one record's payload.
    Read { namespace: String, offset: u64 },
    /// Walk every record in insertion order.
    Scan { namespace: String },
    /// Run a `{tag}`/`{and}`/`{or}` query tree (as a JSON string) and print matches.
    Query { namespace: String, tree: String },
    /// Rewrite the namespace's file with no allocation slack.
    Compact { namespace: String },
    /// Print used-byte and per-tag counters.
    Stats { namespace: String },
    /// Drop the namespace's in-memory handle (files untouched).
    Close { namespace: String },
    /// Close and delete every file belonging to a namespace.
    Delete { namespace: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config { root: cli.root.clone(), verbosity: cli.verbose, ..Config::default() };

    tracing_subscriber::fmt().with_max_level(config.tracing_level()).init();

    let registry = StoreRegistry::open(&config.root)?;

    match cli.command {
        Commands::Append { namespace, alloc_size, tags, data, file } => {
            let payload = read_payload(data, file)?;
            let alloc_size = alloc_size.unwrap_or(payload.len() as u32);
            let store = registry.get_or_create(&namespace)?;
            let offset = store.append_with_tags(alloc_size, &payload, &tags)?;
            println!("offset={offset}");
        }

        Commands::Modify { namespace, offset, pos, data, file, reset_length } => {
            let payload = read_payload(data, file)?;
            let store = registry.get_or_create(&namespace)?;
            store.modify(offset, pos, &payload, reset_length)?;
            println!("ok");
        }

        Commands::Read { namespace, offset } => {
            let store = registry.get_or_create(&namespace)?;
            let payload = store.read(offset)?;
            use std::io::Write;
            std::io::stdout().write_all(&payload)?;
        }

        Commands::Scan { namespace } => {
            let store = registry.get_or_create(&namespace)?;
            store.scan(|offset, payload| {
                println!("{offset:>10}  {} B", payload.len());
                true
            })?;
        }

        Commands::Query { namespace, tree } => {
            let parsed: serde_json::Value = serde_json::from_str(&tree)
                .map_err(|e| rochefort::StoreError::QueryParse(e.to_string()))?;
            let store = registry.get_or_create(&namespace)?;
            for result in store.query(&parsed)? {
                let (offset, payload) = result?;
                println!("{offset:>10}  {} B", payload.len());
            }
        }

        Commands::Compact { namespace } => {
            let store = registry.get_or_create(&namespace)?;
            let relocations = store.compact()?;
            println!("compacted, {} record(s) relocated", relocations.len());
        }

        Commands::Stats { namespace } => {
            let store = registry.get_or_create(&namespace)?;
            let stats = store.stats();
            println!("path        {}", stats.path.display());
            println!("used_bytes  {}", stats.used_bytes);
            println!("tags");
            let mut tags: Vec<_> = stats.tag_counts.into_iter().collect();
            tags.sort();
            for (tag, count) in tags {
                println!("  {tag:<24} {count}");
            }
        }

        Commands::Close { namespace } => {
            registry.close(&namespace)?;
            println!("closed {namespace}");
        }

        Commands::Delete { namespace } => {
            registry.delete(&namespace)?;
            println!("deleted {namespace}");
        }
    }

    Ok(())
}

fn read_payload(data: Option<String>, file: Option<PathBuf>) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match (data, file) {
        (Some(s), None) => Ok(s.into_bytes()),
        (None, Some(path)) => Ok(std::fs::read(path)?),
        (None, None) => Err("one of --data or --file is required".into()),
        (Some(_), Some(_)) => unreachable!("clap enforces conflicts_with"),
    }
}
