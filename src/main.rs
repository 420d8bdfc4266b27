mod app;
mod auth;
mod bot;
mod menus;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
