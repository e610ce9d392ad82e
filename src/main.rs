/// Entry point for the statsd manager.
///
/// Configuration is read from `STATSD_*` environment variables and the log
/// level from `RUST_LOG`.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info STATSD_CONTAINERS_DIR=/tmp/containers cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    statsd_manager::run().await
}
