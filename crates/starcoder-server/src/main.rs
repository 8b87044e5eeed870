use clap::Parser;
use starcoder_server::{run_server, ServerArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = ServerArgs::parse();
    let addr = args.addr()?;
    let (state, weights) = args.build_state()?;

    run_server(state, addr).await?;

    // The weight map stays mapped until the listener has shut down.
    drop(weights);
    Ok(())
}
