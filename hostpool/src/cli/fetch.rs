use anyhow::Context;
use bytes::Bytes;
use hostpool_core::config::{PoolSettings, load_settings};
use hostpool_core::pool::{SuperPool, create_super_pool};
use hostpool_core::transport::TcpTransport;
use http::Request;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

pub struct FetchArgs {
    pub config: Option<PathBuf>,
    pub max_connections: Option<usize>,
    pub pipelining_limit: Option<usize>,
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FetchLine<'a> {
    index: usize,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn run(args: FetchArgs) -> anyhow::Result<()> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => PoolSettings::default(),
    };

    if let Some(max_connections) = args.max_connections {
        settings.max_connections = max_connections;
    }
    if let Some(pipelining_limit) = args.pipelining_limit {
        settings.pipelining_limit = pipelining_limit;
    }

    let pool: SuperPool<usize> =
        create_super_pool(settings, Arc::new(TcpTransport)).context("invalid pool settings")?;

    let mut requests = JoinSet::new();
    let mut failures = 0usize;

    for (index, url) in args.urls.iter().enumerate() {
        match Request::get(url.as_str()).body(Bytes::new()) {
            Ok(request) => {
                let pool = pool.clone();
                requests.spawn(async move { pool.submit(request, index).await });
            }
            Err(e) => {
                failures += 1;
                print_line(&FetchLine {
                    index,
                    url,
                    status: None,
                    bytes: None,
                    error: Some(e.to_string()),
                })?;
            }
        }
    }

    while let Some(joined) = requests.join_next().await {
        let (result, index) = joined.context("fetch task panicked")?;
        let url = &args.urls[index];

        let line = match result {
            Ok(response) => FetchLine {
                index,
                url,
                status: Some(response.status().as_u16()),
                bytes: Some(response.body().len()),
                error: None,
            },
            Err(e) => {
                failures += 1;
                tracing::warn!(url = %url, error = %e, "fetch failed");
                FetchLine {
                    index,
                    url,
                    status: None,
                    bytes: None,
                    error: Some(e.to_string()),
                }
            }
        };
        print_line(&line)?;
    }

    pool.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{failures} of {} requests failed", args.urls.len());
    }

    Ok(())
}

fn print_line(line: &FetchLine<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}
