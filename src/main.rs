#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cartscout::cli::run().await
}
