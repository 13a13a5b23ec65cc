use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use medrag_retriever::{
    RetrieverError,
    answer::ChatCompletionsGenerator,
    config::{DEFAULT_CONFIG_FILE, RetrieverConfig},
    dataset::load_records,
    qa::{AssistantAnswer, MEDICAL_SYSTEM_PROMPT, MedicalAssistant},
    retrieval::{
        builder::IndexBuilder,
        context::SourceRef,
        retriever::{QueryRequest, RetrievalResult, Retriever},
    },
    status::IndexStatus,
    storage::IndexArtifact,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Build and query the medical knowledge-base index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults are used when it does not exist)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Index directory, overriding [index].dir
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the index from the medical dataset
    Build {
        /// Dataset file, overriding the configured candidate locations
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Only index the first N records
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the chunks most similar to a query
    Search {
        query: String,
        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Assemble the answer context for a query
    Query {
        query: String,
        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Context budget in characters
        #[arg(long)]
        max_context_chars: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Answer a question, or start an interactive session without one
    Ask {
        question: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index status
    Info {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = RetrieverConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(dir) = args.index_dir {
        config.index.dir = dir;
    }

    match args.command {
        Commands::Build { dataset, limit } => {
            let dataset_path = config.dataset.resolve(dataset.as_deref())?;
            let records = load_records(&dataset_path, limit.or(config.dataset.limit))?;
            let provider = config.embedding.create_provider().await?;
            let paths = config.index.paths();

            let builder = IndexBuilder::from_config(&config, provider)?;
            let (artifact, stats) = builder
                .build_and_save(&records, &paths, config.index.io_timeout())
                .await?;

            println!("Index built at {}", paths.dir.display());
            println!("  Dataset: {}", dataset_path.display());
            println!("  Records: {}", stats.records_processed);
            println!("  Chunks: {}", stats.chunks_created);
            println!("  Embedding batches: {}", stats.embedding_batches);
            println!(
                "  Model: {} ({}, dimension {})",
                artifact.header().embedding_model_name,
                artifact.header().embedding_provider,
                artifact.header().embedding_dimension
            );
            println!("  Time: {:.1}s", stats.elapsed_ms as f64 / 1000.0);
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            format,
        } => {
            let retriever = open_retriever(&config).await?;
            let result = retriever
                .query(&query, top_k.unwrap_or(config.retrieval.top_k))
                .await?;
            print_search(&result, &format)?;
            Ok(())
        }
        Commands::Query {
            query,
            top_k,
            max_context_chars,
            format,
        } => {
            let retriever = open_retriever(&config).await?;
            let request = QueryRequest {
                query_text: query,
                top_k: top_k.unwrap_or(config.retrieval.top_k),
                max_context_chars: max_context_chars.unwrap_or(config.retrieval.max_context_chars),
            };
            let response = retriever.answer_context(&request).await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    if let Some(message) = &response.message {
                        println!("⚠ {message}");
                    }
                    println!("Confidence: {:.2}", response.confidence);
                    print_sources(&response.sources);
                    if !response.answer_context.is_empty() {
                        println!("Context:\n{}", response.answer_context);
                    }
                }
            }
            Ok(())
        }
        Commands::Ask { question, format } => {
            let api_key = config.generator.api_key_from_env()?;
            let retriever = Arc::new(open_retriever(&config).await?);
            let generator = ChatCompletionsGenerator::new(&config.generator, api_key)?
                .with_system_prompt(MEDICAL_SYSTEM_PROMPT);
            let assistant = MedicalAssistant::new(retriever, Arc::new(generator))
                .with_top_k(config.retrieval.top_k)
                .with_max_context_chars(config.retrieval.max_context_chars);

            match question {
                Some(question) => {
                    let answer = assistant.ask(&question).await?;
                    print_answer(&answer, &format)?;
                }
                None => interactive(&assistant, &config).await?,
            }
            Ok(())
        }
        Commands::Info { format } => {
            let status =
                IndexStatus::inspect(&config.index.paths(), config.index.io_timeout()).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Summary | OutputFormat::Full => print_status(&status),
            }
            Ok(())
        }
    }
}

/// Load the index and pair it with the configured query provider.
async fn open_retriever(config: &RetrieverConfig) -> anyhow::Result<Retriever> {
    let loaded =
        IndexArtifact::load_with_timeout(config.index.paths(), config.index.io_timeout()).await;
    let artifact = match loaded {
        Ok(artifact) => artifact,
        Err(e @ RetrieverError::ArtifactNotFound { .. }) => {
            return Err(anyhow!("{e}\nRun `medrag build` to create the index first."));
        }
        Err(e @ RetrieverError::ArtifactCorruption { .. }) => {
            return Err(anyhow!("{e}\nRebuild the index with `medrag build`."));
        }
        Err(e) => return Err(e.into()),
    };

    let provider = config.embedding.create_provider().await?;
    let retriever = Retriever::new(Arc::new(artifact), provider)
        .context("The configured embedding provider does not match the index")?
        .with_policy(config.embedding.policy());
    Ok(retriever)
}

async fn interactive(assistant: &MedicalAssistant, config: &RetrieverConfig) -> anyhow::Result<()> {
    println!("Medical Q&A (model: {})", assistant.generator().model_name());
    println!("Type a question, 'info' for index status, 'help' for commands, 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "help" => {
                println!("  <question>  ask a medical question");
                println!("  info        show index status");
                println!("  quit        leave the session");
            }
            "info" => {
                let status = IndexStatus::from_artifact(
                    assistant.retriever().artifact(),
                    &config.index.paths(),
                );
                print_status(&status);
            }
            question => match assistant.ask(question).await {
                Ok(answer) => print_answer(&answer, &OutputFormat::Summary)?,
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }
    println!("Goodbye.");
    Ok(())
}

fn print_search(result: &RetrievalResult, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Summary => {
            if let Some(message) = &result.message {
                println!("⚠ {message}");
            }
            println!(
                "Found {} results (confidence {:.2}):",
                result.results.len(),
                result.confidence
            );
            for hit in &result.results {
                println!(
                    "  [{:.3}] {} | {}",
                    hit.score, hit.chunk.id, hit.chunk.original_question_preview
                );
            }
        }
        OutputFormat::Full => {
            if let Some(message) = &result.message {
                println!("⚠ {message}");
            }
            for hit in &result.results {
                println!("Chunk: {} (position {})", hit.chunk.id, hit.position);
                println!("Score: {:.4}", hit.score);
                println!("Source: {}", hit.chunk.source);
                println!(
                    "Characters: {}-{}",
                    hit.chunk.char_start, hit.chunk.char_end
                );
                println!("Content:\n{}", hit.chunk.chunk_text);
                println!("---");
            }
        }
    }
    Ok(())
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        println!("Sources: none");
        return;
    }
    println!("Sources:");
    for (i, source) in sources.iter().enumerate() {
        println!(
            "  {}. [{:.3}] {} #{}: {}",
            i + 1,
            source.score,
            source.source,
            source.record_index,
            source.original_question_preview
        );
    }
}

fn print_answer(answer: &AssistantAnswer, format: &OutputFormat) -> anyhow::Result<()> {
    if *format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }
    if !answer.generated && !answer.sources.is_empty() {
        println!("⚠ Answer generation failed");
    }
    println!("{}", answer.answer);
    println!();
    println!("Confidence: {:.2}", answer.confidence);
    print_sources(&answer.sources);
    Ok(())
}

fn print_status(status: &IndexStatus) {
    println!("Index: {} ({:?})", status.index_dir, status.state);
    if let Some(error) = &status.error {
        println!("  Problem: {error}");
    }
    if let Some(model) = &status.embedding_model {
        println!(
            "  Model: {} ({}, dimension {})",
            model.model_name, model.provider, model.dimension
        );
    }
    if let (Some(size), Some(overlap)) = (status.chunk_size, status.chunk_overlap) {
        println!("  Chunking: {size} chars, {overlap} overlap");
    }
    println!("  Chunks: {}", status.total_chunks);
    println!("  Records: {}", status.total_records);
    if let Some(created_at) = status.created_at {
        println!("  Created: {}", created_at.to_rfc3339());
    }
    if let Some(size) = status.vector_file_size_bytes {
        println!("  Vector store: {size} bytes");
    }
    if let Some(size) = status.metadata_file_size_bytes {
        println!("  Metadata: {size} bytes");
    }
    if let Some(checksum) = &status.vector_checksum {
        println!("  Checksum: {checksum}");
    }
}
