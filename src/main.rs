#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cliforge_cli::run().await
}
