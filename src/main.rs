// SPDX-License-Identifier: MIT OR Apache-2.0

#[tokio::main]
async fn main() {
    if let Err(err) = xmcores::cli::run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
