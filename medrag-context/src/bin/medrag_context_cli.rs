use clap::Parser;
use medrag_context::{ChunkConfig, MEDICAL_DELIMITERS, MedicalRecord, RecordChunker};
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk a medical record dataset into JSON output using medrag-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON array or JSON Lines file of records. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Dataset name recorded as the source of every chunk.
    #[arg(short, long, default_value = "medical_dataset")]
    source: String,

    /// Maximum length of each chunk, in characters.
    #[arg(short = 'm', long, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by adjacent chunks.
    #[arg(short, long, default_value_t = 200)]
    overlap: usize,

    /// Comma-separated list of regex patterns for delimiters.
    /// Defaults to the medical delimiters if not provided.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let records = parse_records(&content)?;

    let config = ChunkConfig::new(args.chunk_size, args.overlap)?;
    let chunker = match args.delimiters {
        Some(patterns) => RecordChunker::with_delimiters(config, &patterns)?,
        None => RecordChunker::with_delimiters(config, MEDICAL_DELIMITERS)?,
    };

    let chunks: Vec<_> = records
        .iter()
        .enumerate()
        .flat_map(|(index, record)| chunker.chunk(index, record, &args.source))
        .collect();

    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{json_output}");

    Ok(())
}

fn parse_records(content: &str) -> serde_json::Result<Vec<MedicalRecord>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content);
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
