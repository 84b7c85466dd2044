use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use siteqa_ai::embeddings::{Embedder, HashEmbedder, OllamaEmbedder};
use siteqa_ai::llm::{Llm, OllamaLlm};
use siteqa_ai::ollama::OllamaClient;
use siteqa_ai::{AskOptions, AskResponse, Pipeline, ScoreThreshold};
use siteqa_core::config::{EmbeddingBackend, Settings};
use siteqa_core::domain::Document;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "siteqa")]
#[command(version)]
#[command(about = "Answer questions about a website from its ingested pages", long_about = None)]
struct Cli {
    /// JSON or TOML settings file; SITEQA_* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index page text.
    Ingest {
        /// Plain-text page to ingest (requires --url).
        #[arg(long, requires = "url")]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value = "")]
        title: String,
        /// JSON array of {"url", "title", "text"} pages.
        #[arg(long, conflicts_with = "file")]
        pages: Option<PathBuf>,
        /// Delete the existing index first.
        #[arg(long)]
        rebuild: bool,
    },
    /// Ask a question against the persisted index.
    Ask {
        question: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Print the ranked passages for a question without generating an answer.
    Search {
        question: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Print index statistics.
    Stats,
    /// Delete the persisted index.
    Clear,
}

#[derive(Args, Debug)]
struct RetrievalArgs {
    #[arg(long)]
    k: Option<usize>,
    /// Minimum passage score; overrides the configured threshold.
    #[arg(long)]
    threshold: Option<f32>,
    /// Keep every top-k passage, ignoring the configured threshold.
    #[arg(long, conflicts_with = "threshold")]
    no_threshold: bool,
}

impl RetrievalArgs {
    fn options(&self) -> AskOptions {
        let threshold = match (self.no_threshold, self.threshold) {
            (true, _) => ScoreThreshold::Off,
            (false, Some(t)) => ScoreThreshold::Min(t),
            (false, None) => ScoreThreshold::Configured,
        };
        AskOptions {
            k: self.k,
            threshold,
            cancel: None,
        }
    }
}

#[derive(Deserialize)]
struct PageInput {
    url: String,
    #[serde(default)]
    title: String,
    text: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,siteqa_ai=info")),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

fn build_pipeline(settings: Settings) -> Result<Pipeline> {
    let timeout = settings.request_timeout();
    let embedder: Arc<dyn Embedder> = match settings.embedding_backend {
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(
            settings.embedding_model_id.clone(),
            settings.hash_dimensions,
        )?),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
            OllamaClient::new(&settings.ollama_base_url)?.with_timeout(timeout),
        )),
    };
    let llm: Arc<dyn Llm> = Arc::new(
        OllamaLlm::new(OllamaClient::new(&settings.ollama_base_url)?.with_timeout(timeout))
            .with_temperature(settings.temperature),
    );
    Ok(Pipeline::new(settings, embedder, llm)?)
}

fn read_documents(
    file: Option<&Path>,
    url: Option<&str>,
    title: &str,
    pages: Option<&Path>,
) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    if let Some(path) = file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let url = url.unwrap_or_default();
        docs.push(Document::new(url, title, &text)?);
    }
    if let Some(path) = pages {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let inputs: Vec<PageInput> = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to decode pages in {}", path.display()))?;
        for p in inputs {
            docs.push(Document::new(p.url, p.title, &p.text)?);
        }
    }
    if docs.is_empty() {
        bail!("nothing to ingest: pass --file with --url, or --pages");
    }
    Ok(docs)
}

fn ingest_command(
    pipeline: &Pipeline,
    docs: Vec<Document>,
    rebuild: bool,
) -> Result<()> {
    if rebuild {
        pipeline.clear()?;
    }
    let s = pipeline.settings();
    let report = pipeline.ingest(&docs, s.chunk_size, s.chunk_overlap)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn ask_command(pipeline: &Pipeline, question: &str, opts: AskOptions) -> Result<()> {
    let response = match pipeline.load() {
        Ok(_) => pipeline.ask_response(question, opts),
        Err(e) => AskResponse::from_error(e),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn search_command(pipeline: &Pipeline, question: &str, opts: AskOptions) -> Result<()> {
    pipeline.load()?;
    let result = pipeline.retrieve(question, &opts)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn stats_command(pipeline: &Pipeline) -> Result<()> {
    let stats = pipeline.load()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Cli::parse();
    let settings = Settings::load(args.config.as_deref())?;
    info!(index_dir = %settings.index_dir.display(), "starting siteqa");
    let pipeline = build_pipeline(settings)?;

    match args.command {
        Commands::Ingest {
            file,
            url,
            title,
            pages,
            rebuild,
        } => {
            let docs = read_documents(file.as_deref(), url.as_deref(), &title, pages.as_deref())?;
            ingest_command(&pipeline, docs, rebuild)?
        }
        Commands::Ask {
            question,
            retrieval,
        } => ask_command(&pipeline, &question, retrieval.options())?,
        Commands::Search {
            question,
            retrieval,
        } => search_command(&pipeline, &question, retrieval.options())?,
        Commands::Stats => stats_command(&pipeline)?,
        Commands::Clear => {
            pipeline.clear()?;
            println!("{}", serde_json::json!({ "cleared": true }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_ask_with_overrides() {
        let cli = Cli::try_parse_from([
            "siteqa",
            "--config",
            "siteqa.toml",
            "ask",
            "What color is the sky?",
            "--k",
            "2",
            "--threshold",
            "0.4",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("siteqa.toml")));
        match cli.command {
            Commands::Ask {
                question,
                retrieval,
            } => {
                assert_eq!(question, "What color is the sky?");
                let opts = retrieval.options();
                assert_eq!(opts.k, Some(2));
                assert_eq!(opts.threshold, ScoreThreshold::Min(0.4));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn search_accepts_no_threshold_but_not_both() {
        let cli = Cli::try_parse_from(["siteqa", "search", "shipping times", "--no-threshold"])
            .unwrap();
        match cli.command {
            Commands::Search {
                question,
                retrieval,
            } => {
                assert_eq!(question, "shipping times");
                let opts = retrieval.options();
                assert_eq!(opts.k, None);
                assert_eq!(opts.threshold, ScoreThreshold::Off);
            }
            _ => panic!("expected search"),
        }

        assert!(Cli::try_parse_from([
            "siteqa",
            "ask",
            "q",
            "--threshold",
            "0.3",
            "--no-threshold"
        ])
        .is_err());

        let cli = Cli::try_parse_from(["siteqa", "ask", "q"]).unwrap();
        match cli.command {
            Commands::Ask { retrieval, .. } => {
                assert_eq!(retrieval.options().threshold, ScoreThreshold::Configured)
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn ingest_file_requires_url() {
        assert!(Cli::try_parse_from(["siteqa", "ingest", "--file", "page.txt"]).is_err());
    }

    #[test]
    fn reads_pages_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.json");
        fs::write(
            &path,
            r#"[{"url": "https://example.com/a", "title": "A", "text": "Alpha  text."},
                {"url": "https://example.com/b", "text": "Beta"}]"#,
        )
        .unwrap();

        let docs = read_documents(None, None, "", Some(&path)).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "Alpha text.");
        assert_eq!(docs[1].source.title, "");
        assert!(read_documents(None, None, "", None).is_err());
    }
}
