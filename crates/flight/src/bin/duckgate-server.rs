use std::env;

use duckgate_common::ServerConfig;

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match env::var("DUCKGATE_CONFIG") {
        Ok(path) => ServerConfig::load(&path)?,
        Err(_) => ServerConfig::default(),
    };
    if let Ok(port) = env::var("DUCKGATE_PORT") {
        config.port = port.parse()?;
    }
    if let Ok(mode) = env::var("DUCKGATE_ACCESS_MODE") {
        config.access_mode = match mode.as_str() {
            "complete" => duckgate_common::AccessMode::Complete,
            "restricted" => duckgate_common::AccessMode::Restricted,
            other => return Err(format!("invalid access mode: {other}").into()),
        };
    }
    if let Ok(path) = env::var("DUCKGATE_WAREHOUSE_PATH") {
        config.warehouse_path = path;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(env_or_default("DUCKGATE_LOG", "info"))
            }),
        )
        .init();

    let config = load_config()?;
    std::fs::create_dir_all(&config.warehouse_path)?;
    duckgate_flight::serve(config).await?;
    Ok(())
}
