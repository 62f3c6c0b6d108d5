#[tokio::main]
async fn main() -> anyhow::Result<()> {
    v2t_cli::run().await
}
