use clap::{value_parser, Arg, ArgMatches, Command};
use std::env;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod mcp;
mod pipeline;
mod tools;
mod utils;

#[cfg(test)]
mod test_support;

use config::{GeminiConfig, PipelineConfig, DEFAULT_GEMINI_MODEL, MB};
use mcp::server::McpServer;
use pipeline::DocumentPipeline;
use utils::answer_service::{AnswerService, GeminiAnswerService};
use utils::memory_monitor::{MemoryMonitor, ProcessMemoryMonitor};

fn cli() -> Command {
    Command::new("mcp-docqa")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A Model Context Protocol server for memory-bounded PDF question answering")
        .long_about(
            "This MCP server provides the following tools:\n\
            - document-qa: Download a PDF and answer questions about it (requires a Gemini API key)\n\
            - memory-status: Report process memory against the configured ceiling",
        )
        .arg(
            Arg::new("max-pdf-mb")
                .long("max-pdf-mb")
                .value_name("MB")
                .help("Largest PDF accepted, in megabytes [env: DOCQA_MAX_PDF_MB]")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("max-questions")
                .long("max-questions")
                .value_name("N")
                .help("Most questions accepted per request [env: DOCQA_MAX_QUESTIONS]")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("max-text-chars")
                .long("max-text-chars")
                .value_name("CHARS")
                .help("Budget for extracted document text [env: DOCQA_MAX_TEXT_CHARS]")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("memory-ceiling-mb")
                .long("memory-ceiling-mb")
                .value_name("MB")
                .help("Process memory ceiling the pipeline degrades against [env: DOCQA_MEMORY_CEILING_MB]")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("headroom-mb")
                .long("headroom-mb")
                .value_name("MB")
                .help("Degrade once usage is within this distance of the ceiling [env: DOCQA_HEADROOM_MB]")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("llm-timeout-secs")
                .long("llm-timeout-secs")
                .value_name("SECS")
                .help("Timeout for a single answer call")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("gemini-api-key")
                .long("gemini-api-key")
                .value_name("KEY")
                .help("Gemini API key [env: GOOGLE_API_KEY]")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("gemini-model")
                .long("gemini-model")
                .value_name("MODEL")
                .help("Gemini model name [env: GEMINI_MODEL]")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .help("Only log errors (for MCP clients)")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Command-line value, else the parsed environment variable.
fn arg_or_env<T>(matches: &ArgMatches, id: &str, var: &str) -> Option<T>
where
    T: FromStr + Clone + Send + Sync + 'static,
{
    matches.get_one::<T>(id).cloned().or_else(|| {
        let raw = env::var(var).ok()?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable {}={}", var, raw);
                None
            }
        }
    })
}

fn pipeline_config(matches: &ArgMatches) -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(mb) = arg_or_env::<u64>(matches, "max-pdf-mb", "DOCQA_MAX_PDF_MB") {
        config.max_pdf_bytes = mb * MB;
    }
    if let Some(n) = arg_or_env::<usize>(matches, "max-questions", "DOCQA_MAX_QUESTIONS") {
        config.max_questions = n.max(1);
    }
    if let Some(chars) = arg_or_env::<usize>(matches, "max-text-chars", "DOCQA_MAX_TEXT_CHARS") {
        config.max_text_chars = chars;
    }
    if let Some(mb) = arg_or_env::<f64>(matches, "memory-ceiling-mb", "DOCQA_MEMORY_CEILING_MB") {
        config.memory_ceiling_mb = mb;
    }
    if let Some(mb) = arg_or_env::<f64>(matches, "headroom-mb", "DOCQA_HEADROOM_MB") {
        config.headroom_mb = mb;
    }
    if let Some(secs) = matches.get_one::<u64>("llm-timeout-secs") {
        config.llm_timeout = Duration::from_secs(*secs);
    }

    config
}

fn gemini_config(matches: &ArgMatches) -> Option<GeminiConfig> {
    let api_key = matches
        .get_one::<String>("gemini-api-key")
        .cloned()
        .or_else(|| env::var("GOOGLE_API_KEY").ok())
        .filter(|key| !key.trim().is_empty())?;
    let model = matches
        .get_one::<String>("gemini-model")
        .cloned()
        .or_else(|| env::var("GEMINI_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
    Some(GeminiConfig { api_key, model })
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    // Initialize tracing to stderr only (stdout is reserved for JSON-RPC)
    let default_level = if matches.get_flag("quiet") { "error" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = Arc::new(pipeline_config(&matches));
    info!(
        max_pdf_bytes = config.max_pdf_bytes,
        max_questions = config.max_questions,
        ceiling_mb = config.memory_ceiling_mb,
        headroom_mb = config.headroom_mb,
        "Pipeline configuration loaded"
    );

    let monitor: Arc<dyn MemoryMonitor> = Arc::new(ProcessMemoryMonitor::new(config.memory_ceiling_mb));

    // Log answer service configuration status (without exposing secrets)
    let pipeline = match gemini_config(&matches) {
        Some(gemini) => {
            let model = gemini.model.clone();
            let service = match GeminiAnswerService::new(gemini, config.llm_timeout) {
                Ok(service) => service,
                Err(e) => {
                    error!("Failed to create answer service: {}", e);
                    process::exit(1);
                }
            };
            let service: Arc<dyn AnswerService> = Arc::new(service);
            match DocumentPipeline::new(Arc::clone(&config), Arc::clone(&monitor), service) {
                Ok(pipeline) => {
                    info!(model = %model, "Document Q&A tool enabled");
                    Some(Arc::new(pipeline))
                }
                Err(e) => {
                    error!("Failed to create document pipeline: {}", e);
                    process::exit(1);
                }
            }
        }
        None => {
            warn!("Gemini API key not found - document-qa tool will be disabled");
            None
        }
    };

    info!("Starting MCP server...");

    let mut server = McpServer::new(config, monitor, pipeline);
    if let Err(e) = server.start().await {
        error!("Failed to start server: {}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let matches = cli()
            .try_get_matches_from([
                "mcp-docqa",
                "--max-pdf-mb",
                "10",
                "--max-questions",
                "5",
                "--memory-ceiling-mb",
                "1024",
                "--llm-timeout-secs",
                "15",
            ])
            .unwrap();
        let config = pipeline_config(&matches);
        assert_eq!(config.max_pdf_bytes, 10 * MB);
        assert_eq!(config.max_questions, 5);
        assert_eq!(config.memory_ceiling_mb, 1024.0);
        assert_eq!(config.llm_timeout, Duration::from_secs(15));
        assert_eq!(config.max_text_chars, PipelineConfig::default().max_text_chars);
    }

    #[test]
    fn gemini_key_flag_enables_answer_service() {
        let matches = cli()
            .try_get_matches_from(["mcp-docqa", "--gemini-api-key", "k", "--gemini-model", "m"])
            .unwrap();
        let gemini = gemini_config(&matches).unwrap();
        assert_eq!(gemini.api_key, "k");
        assert_eq!(gemini.model, "m");
    }

    #[test]
    fn rejects_non_numeric_limits() {
        assert!(cli()
            .try_get_matches_from(["mcp-docqa", "--max-pdf-mb", "lots"])
            .is_err());
    }
}
