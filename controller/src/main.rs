mod host;
mod http;
mod mqtt;
mod runtime;
mod store;
mod timer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
