use anyhow::Context;
use clap::Parser;
use refract_proxy::{EventKind, Proxy, ProxyConfig, SslConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "refract", about = "Intercepting HTTP/HTTPS proxy with record/replay")]
struct Args {
    /// Port of the plaintext proxy listener
    #[arg(short, long, default_value_t = 8989, env = "REFRACT_PORT")]
    port: u16,

    /// Address the listener binds to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Terminate TLS for CONNECT tunnels (requires --key and --cert)
    #[arg(long)]
    mitm: bool,

    /// PEM private key for the interception certificate
    #[arg(long)]
    key: Option<PathBuf>,

    /// PEM certificate presented on terminated tunnels
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM CA certificate appended to the served chain
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Persist passing traffic as fixtures
    #[arg(long)]
    record: bool,

    /// Answer from recorded fixtures
    #[arg(long)]
    replay: bool,

    /// Fixture store directory
    #[arg(long, default_value = "fixtures")]
    fixtures: PathBuf,

    /// Strip caching from proxied exchanges
    #[arg(long)]
    no_cache: bool,

    /// Fail fixture misses instead of falling through to the network
    #[arg(long)]
    offline: bool,

    /// Bypass record/replay for local targets
    #[arg(long)]
    ignore_local: bool,

    /// Max idle outbound connections kept per host
    #[arg(long, default_value_t = 8)]
    max_sockets: usize,
}

fn load_ssl(args: &Args) -> anyhow::Result<Option<SslConfig>> {
    let (Some(key), Some(cert)) = (&args.key, &args.cert) else {
        return Ok(None);
    };
    let key = std::fs::read(key).with_context(|| format!("reading key {}", key.display()))?;
    let cert = std::fs::read(cert).with_context(|| format!("reading cert {}", cert.display()))?;
    let ca = match &args.ca {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading ca {}", path.display()))?
        }
        None => Vec::new(),
    };
    Ok(Some(SslConfig { key, cert, ca }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = ProxyConfig {
        port: args.port,
        host: args.host.clone(),
        ssl: load_ssl(&args)?,
        mitm: args.mitm,
        record: args.record,
        replay: args.replay,
        fixtures_path: args.fixtures.clone(),
        no_cache: args.no_cache,
        enable_network: !args.offline,
        ignore_local: args.ignore_local,
        max_sockets: args.max_sockets,
    };

    let proxy = Arc::new(Proxy::new(config, Vec::new()).await?);
    proxy.notifier.subscribe(EventKind::Error, |event| {
        tracing::warn!(detail = %event.detail, "proxy error");
    });
    Arc::clone(&proxy).listen().await?;

    tokio::signal::ctrl_c().await?;
    proxy.close();
    Ok(())
}
