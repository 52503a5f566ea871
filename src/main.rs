use std::sync::Arc;

use affiliate_proxy::modules;
use affiliate_proxy::proxy;
use affiliate_proxy::proxy::upstream::client::EgressConfig;
use affiliate_proxy::proxy::upstream::HttpTransport;

#[tokio::main]
async fn main() -> Result<(), String> {
    modules::logger::init_logger();

    let mut config = match modules::config::load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!("failed to load config: {}. using defaults", err);
            let cfg = proxy::ProxyConfig::default();
            let _ = modules::config::save_config(&cfg);
            cfg
        }
    };

    if let Ok(value) = std::env::var("AFFILIATE_PROXY_PORT") {
        if let Ok(port) = value.parse::<u16>() {
            config.port = port;
        }
    }

    if let Ok(value) = std::env::var("AFFILIATE_PROXY_UPSTREAM") {
        if !value.is_empty() {
            config.upstream_url = value;
        }
    }

    if let Ok(value) = std::env::var("AFFILIATE_APP_KEY") {
        if !value.is_empty() {
            config.app_key = value;
        }
    }

    let bind_address = if let Ok(addr) = std::env::var("AFFILIATE_PROXY_BIND") {
        if addr != "127.0.0.1" && addr != "localhost" {
            config.allow_lan_access = true;
        }
        addr
    } else {
        config.get_bind_address().to_string()
    };

    if config.app_key.is_empty() {
        return Err("app_key is not configured; set it in the config file or AFFILIATE_APP_KEY".to_string());
    }

    // The shared secret lives only in the environment and, after this read,
    // only inside the signature engine.
    let secret = std::env::var("AFFILIATE_APP_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "AFFILIATE_APP_SECRET is not set".to_string())?;

    let transport = HttpTransport::new(&EgressConfig {
        proxy_url: config.egress_proxy.clone(),
        user_agent: config.user_agent.clone(),
    })?;

    let pipeline = Arc::new(proxy::ProxyPipeline::new(&config, secret, transport));

    let (server, handle) =
        proxy::AxumServer::start(bind_address.clone(), config.port, pipeline).await?;

    tracing::info!(
        "affiliate proxy listening on http://{}:{} (upstream {})",
        bind_address,
        config.port,
        config.upstream_url
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!("shutdown requested, stopping server...");
    server.stop();
    let _ = handle.await;

    Ok(())
}
