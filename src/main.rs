use clap::Parser;

use chatr_voice::BackendKind;

#[derive(Parser)]
#[command(name = "chatr-voice", about = "Voice channel media session server")]
struct Cli {
    /// API server port
    #[arg(long, default_value = "9847")]
    port: u16,

    /// Custom data directory
    #[arg(long)]
    data_dir: Option<String>,

    /// Capture backend
    #[arg(long, value_enum, default_value_t = BackendKind::Virtual)]
    backend: BackendKind,
}

fn main() {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    rt.block_on(chatr_voice::run_headless(cli.data_dir.as_deref(), cli.port, cli.backend));
}
