use anyhow::Result;
use clap::{Parser, Subcommand};
use screenplay_dataset::api::gemini::{GeminiClient, GeminiModel};
use screenplay_dataset::config::Config;
use screenplay_dataset::init::require_file;
use screenplay_dataset::{backfill, chunk, collect, dedupe, scenes, split, tokens, upload, validate, video};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "screenplay-dataset", about = "Build a scene-continuation fine-tuning dataset from screenplays")]
struct Cli {
    /// JSON config with API keys and model names
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask Gemini for genre, theme, tone and runtime of every raw script
    CollectMetadata(collect::CollectArgs),
    /// Split scripts into scenes and write previous -> next scene examples
    SplitScenes(scenes::SceneArgs),
    /// Chunk or truncate entries over the token budget
    ChunkLong(chunk::ChunkArgs),
    /// Tag each example with the raw script it came from
    Backfill(backfill::BackfillArgs),
    /// Drop duplicate examples and cap examples per movie
    Dedupe(dedupe::DedupeArgs),
    /// Report structure, length and genre statistics
    Validate(validate::ValidateArgs),
    /// Split into train/validation files
    TrainVal(split::SplitArgs),
    /// Upload a folder to the Hugging Face Hub
    Upload(upload::UploadArgs),
    /// Generate a demo video with Veo
    GenerateVideo(video::VideoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config).await?;

    match cli.command {
        Command::CollectMetadata(args) => {
            let client = GeminiClient::new(cfg.require_gemini_key()?)?;
            let model = GeminiModel {
                client,
                model: args.model.clone().unwrap_or_else(|| cfg.gemini_model.clone()),
            };
            collect::run(&args, &model).await?;
        }
        Command::SplitScenes(args) => {
            require_file(&args.csv).await?;
            scenes::run(&args).await?;
        }
        Command::ChunkLong(args) => {
            require_file(&args.input).await?;
            let counter = tokens::load_counter(&args.tokenizer, hf_token(&cfg)).await?;
            chunk::run(&args, counter.as_ref()).await?;
        }
        Command::Backfill(args) => {
            require_file(&args.jsonl).await?;
            backfill::run(&args).await?;
        }
        Command::Dedupe(args) => {
            require_file(&args.input).await?;
            dedupe::run(&args).await?;
        }
        Command::Validate(args) => {
            require_file(&args.input).await?;
            let counter = match &args.tokenizer {
                Some(source) => Some(tokens::load_counter(source, hf_token(&cfg)).await?),
                None => None,
            };
            validate::run(&args, counter.as_deref()).await?;
        }
        Command::TrainVal(args) => {
            require_file(&args.input).await?;
            split::run(&args).await?;
        }
        Command::Upload(args) => {
            upload::run(&args, cfg.require_hf_token()?).await?;
        }
        Command::GenerateVideo(args) => {
            let client = GeminiClient::new(cfg.require_gemini_key()?)?;
            let model = args.model.clone().unwrap_or_else(|| cfg.veo_model.clone());
            video::run(&args, &model, &client).await?;
        }
    }
    Ok(())
}

fn hf_token(cfg: &Config) -> Option<String> {
    let token = cfg.hf_token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
