use pipecd_provider::{init_logging, serve, PipecdProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting PipeCD provider");
    serve(PipecdProvider::new()).await
}
