use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rust_dns_splitter::config::AppConfig;
use rust_dns_splitter::engine::ResolverEngine;
use rust_dns_splitter::geoip;
use rust_dns_splitter::handler::DnsHandler;

#[derive(Parser, Debug)]
#[command(
    name = "rust-dns-splitter",
    version,
    about = "Forwarder DNS de doble upstream con filtro anti-envenenamiento"
)]
struct Cli {
    /// Archivo de configuración TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Upstream primario (rápido, doméstico)
    #[arg(long = "primarydns")]
    primary_dns: Option<String>,

    /// Upstream secundario (limpio, confiable)
    #[arg(long = "secondarydns")]
    secondary_dns: Option<String>,

    /// Endpoint de escucha (UDP y TCP)
    #[arg(long = "listenaddr")]
    listen_addr: Option<String>,

    /// Capacidad del cache de respuestas
    #[arg(long = "cachesize")]
    cache_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => {
            AppConfig::load(path).with_context(|| format!("no pude leer config: {path}"))?
        }
        None => AppConfig::default(),
    };

    // los flags pisan al archivo
    if let Some(v) = cli.primary_dns {
        cfg.primary_dns = v;
    }
    if let Some(v) = cli.secondary_dns {
        cfg.secondary_dns = v;
    }
    if let Some(v) = cli.listen_addr {
        cfg.listen_addr = v;
    }
    if let Some(v) = cli.cache_size {
        cfg.cache.capacity = v;
    }
    let cfg = cfg.normalized();

    // fallar acá es fatal: sin oráculo no hay filtro de envenenamiento
    let oracle = geoip::build_oracle(&cfg.geoip)
        .await
        .context("no pude construir el oráculo GeoIP")?;

    let engine = ResolverEngine::new(&cfg, oracle);
    let handler = DnsHandler::new(engine);

    let addr = cfg
        .listen_addr
        .parse()
        .with_context(|| format!("listen_addr inválida: {}", cfg.listen_addr))?;

    tracing::info!(
        listen = %addr,
        primary = %cfg.primary_dns,
        secondary = %cfg.secondary_dns,
        "escuchando UDP y TCP"
    );

    handler.serve(addr).await?;
    Ok(())
}
