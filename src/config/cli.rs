use std::path::PathBuf;

use clap::Parser;

// Define command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the analysis service
    #[arg(short, long, default_value = "http://localhost:8080")]
    pub base_url: String,

    /// API key for the analysis service (falls back to ANALYSIS_API_KEY)
    #[arg(long, env = "ANALYSIS_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Entity ids to process, comma separated (alternative to --entities-file)
    #[arg(short, long, value_delimiter = ',')]
    pub entities: Vec<String>,

    /// File with one entity id per line
    #[arg(long)]
    pub entities_file: Option<PathBuf>,

    /// Analysis type to request (past|risk)
    #[arg(short = 't', long, default_value = "past")]
    pub analysis_type: String,

    /// Optional path to the batch configuration YAML file
    #[arg(short = 'c', long)]
    pub batch_config: Option<PathBuf>,

    /// Optional path to the classification rules YAML file
    #[arg(short = 'r', long)]
    pub rules_config: Option<PathBuf>,

    /// Export format for the results (json|csv)
    #[arg(short = 'f', long, default_value = "json")]
    pub format: String,

    /// Where to write the exported results (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the top N prioritized actions after the run
    #[arg(long, default_value_t = 10)]
    pub top_actions: usize,

    /// Base URL for the escalation classifier; escalation is disabled when omitted
    #[arg(long)]
    pub escalation_url: Option<String>,

    /// Optional: Port for the Prometheus metrics HTTP endpoint
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Validate the configuration files and exit
    #[arg(long)]
    pub validate_config: bool,
}
