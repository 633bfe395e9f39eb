#[tokio::main]
async fn main() {
    let code = match postflow_cli::cli::run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
