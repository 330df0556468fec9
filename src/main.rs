//! Ferrite binary entrypoint kept minimal. The full pipeline lives in
//! the library's `cli` module.

#[tokio::main]
async fn main() {
    std::process::exit(ferrite::cli::run().await);
}
