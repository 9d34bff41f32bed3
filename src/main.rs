use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match content_search::run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
