#[tokio::main]
async fn main() {
    rifa::start_server().await;
}
