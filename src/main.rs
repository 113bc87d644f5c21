#[tokio::main]
async fn main() {
    if let Err(err) = modelgate::app::run().await {
        eprintln!("modelgate failed to start: {err}");
        std::process::exit(1);
    }
}
