use clap::Parser;
use ledger_analyst::{
    config::AnalysisConfig,
    enrichment::ContextEnricher,
    gemini::GeminiClient,
    retrieval::InMemoryVectorIndex,
    service::AnalysisService,
    AnalysisResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ask a grounded question about a local text document
#[derive(Parser, Debug)]
#[command(name = "analyze", version, about, long_about = None)]
struct Cli {
    /// Document to analyze (UTF-8 text; form feeds separate pages)
    #[arg(short, long)]
    file: PathBuf,

    /// Question to answer from the document
    #[arg(short, long)]
    query: String,

    /// Override ANALYSIS_MAX_RETRIES
    #[arg(long)]
    max_retries: Option<u32>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AnalysisConfig::from_env()?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }

    info!(file = %cli.file.display(), model = %config.gemini_model, "Ledger analyst starting");

    let bytes = tokio::fs::read(&cli.file).await?;

    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    let enricher = Arc::new(ContextEnricher::from_config(&config)?);
    let index = Arc::new(InMemoryVectorIndex::new());

    let service = AnalysisService::from_config(&config, index, model, enricher)?;

    match service.run_analysis_upload(&bytes, &cli.query).await {
        Ok(result) if cli.json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(e) => {
            eprintln!("Analysis failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}

fn print_result(result: &AnalysisResult) {
    println!("\n=== ANALYSIS RESULT ===");
    println!("Verification: {}", result.verification_status);
    if let Some(warning) = &result.warning {
        println!("WARNING: {}", warning);
    }
    println!("\n{}\n", result.answer);

    println!("Sources: {}", result.retrieved_source_locators.join(", "));

    if let Some(bundle) = &result.enrichment {
        println!("\n{}", bundle.render());
    }

    if let Some(insights) = &result.insights {
        println!(
            "\nSentiment: {}/100 ({:?}) - {}",
            insights.sentiment.score, insights.sentiment.direction, insights.sentiment.description
        );
        println!("Risk level: {:?}", insights.risk_level);
        for highlight in &insights.highlights {
            match &highlight.metric_value {
                Some(value) => println!("  * {} [{}]", highlight.text, value),
                None => println!("  * {}", highlight.text),
            }
        }
        if !insights.suggested_questions.is_empty() {
            println!("\nFollow-up questions:");
            for question in &insights.suggested_questions {
                println!("  - {}", question);
            }
        }
    }

    println!("\nAudit ID: {}", result.audit_id);
    println!("Reasoning Trace:");
    for (i, trace) in result.reasoning_trace.iter().enumerate() {
        println!("  {}: {}", i + 1, trace);
    }
}
