use anyhow::Context;
use hostpool_core::config::load_settings;
use std::path::Path;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let settings = load_settings(path)
        .with_context(|| format!("invalid settings file {}", path.display()))?;

    println!("✔ Settings loaded from {}", path.display());
    println!(
        "✔ {}..{} connections, {} per connection",
        settings.min_connections, settings.max_connections, settings.pipelining_limit
    );
    println!(
        "✔ {} open requests, {} retries",
        settings.max_open_requests, settings.max_retries
    );
    println!(
        "✔ connect timeout {:?}, bodies up to {} bytes",
        settings.connection.connect_timeout(),
        settings.connection.max_response_body_size
    );
    match settings.idle_timeout() {
        Some(timeout) => println!("✔ idle timeout {timeout:?}"),
        None => println!("✔ no idle timeout"),
    }

    Ok(())
}
