mod credentials;
mod error;
mod log;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use openai_audio::request::DEFAULT_MODEL;
use openai_audio::{
    AudioTool, CredentialValidator, InlineAudio, InvocationRequest, Operation, OutputEvent,
    OutputMode, RequestOptions, ResponseFormat, Settings, TimestampGranularities,
};

use credentials::ProviderChoice;
use error::Error;

const UPLOAD_MIME_TYPE: &str = "application/octet-stream";

#[derive(Parser)]
#[command(name = "openai-audio")]
#[command(about = "Transcribe or translate audio with OpenAI or Azure OpenAI")]
#[command(version)]
struct Cli {
    /// Force debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe (or translate) one audio file
    Transcribe(TranscribeArgs),
    /// Check the configured credentials against the provider
    Validate,
}

#[derive(Args)]
struct TranscribeArgs {
    /// Path to audio file (mp3/mp4/wav/...)
    audio: PathBuf,

    #[arg(long, value_enum, default_value_t = ProviderChoice::Openai)]
    provider: ProviderChoice,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Translate to English instead of transcribing
    #[arg(long)]
    translate: bool,

    #[arg(long)]
    stream: bool,

    /// text, json, verbose_json, srt or vtt
    #[arg(long, default_value = "text")]
    response_format: ResponseFormat,

    #[arg(long, default_value = "")]
    language: String,

    #[arg(long, default_value = "")]
    prompt: String,

    /// none, segment, word or segment_and_word
    #[arg(long, default_value = "none")]
    timestamps: TimestampGranularities,

    /// default, json_only or text_only
    #[arg(long, default_value = "default")]
    output: OutputMode,

    #[arg(long)]
    azure_deployment: Option<String>,
}

fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    log::init(cli.verbose);

    let result = match cli.command {
        Commands::Transcribe(args) => transcribe(args),
        Commands::Validate => validate(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn transcribe(args: TranscribeArgs) -> Result<(), Error> {
    let credentials = credentials::for_provider(
        credentials::from_env(),
        args.provider,
        args.azure_deployment.as_deref(),
    )?;

    let content = std::fs::read(&args.audio)?;
    let audio = InlineAudio::new(file_name(&args.audio), UPLOAD_MIME_TYPE, content);

    let options = RequestOptions {
        operation: if args.translate {
            Operation::Translate
        } else {
            Operation::Transcribe
        },
        model: args.model,
        response_format: args.response_format,
        prompt: args.prompt,
        language: args.language,
        timestamp_granularities: args.timestamps,
        stream: args.stream,
        output_mode: args.output,
        deployment_override: args.azure_deployment,
    };

    let tool = AudioTool::from_env()?;
    let mut stdout = std::io::stdout().lock();

    for event in tool.invoke(InvocationRequest::new(audio, options), &credentials) {
        match event? {
            OutputEvent::Text { text } => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            event @ OutputEvent::Json { .. } => {
                writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
            }
        }
    }
    writeln!(stdout)?;

    Ok(())
}

fn validate() -> Result<(), Error> {
    let validator = CredentialValidator::new(&Settings::from_env())?;
    validator.validate(&credentials::from_env())?;
    println!("Credentials are valid");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio_file".to_string())
}
