use clap::Parser;

use chapterflow::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    chapterflow::init_tracing(cli.log_json);
    chapterflow::run(cli.into_config()).await
}
