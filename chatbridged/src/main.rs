use chatbridged::{run, ReplyTimings, Settings};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP bridge for the line-oriented chat backend", long_about = None)]
struct Cli {
    #[arg(
        long,
        env = "JAVA_HOST",
        default_value = "127.0.0.1",
        help = "Chat backend host"
    )]
    backend_host: String,

    #[arg(
        long,
        env = "JAVA_PORT",
        default_value_t = 6789,
        help = "Chat backend TCP port"
    )]
    backend_port: u16,

    #[arg(
        long,
        env = "HTTP_PORT",
        default_value_t = 5000,
        help = "Port for the HTTP API"
    )]
    http_port: u16,

    #[arg(long, default_value = "0.0.0.0", help = "Address the HTTP API binds to")]
    bind_host: IpAddr,

    #[arg(long, default_value_t = 50, help = "Reply poll interval in milliseconds")]
    tick_ms: u64,

    #[arg(
        long,
        default_value_t = 400,
        help = "Silence in milliseconds that ends a reply"
    )]
    quiet_ms: u64,

    #[arg(
        long,
        default_value_t = 8000,
        help = "Upper bound in milliseconds for a reply wait"
    )]
    max_wait_ms: u64,

    #[arg(
        long,
        default_value_t = 5000,
        help = "Upper bound in milliseconds for the group list reply"
    )]
    group_list_max_wait_ms: u64,

    #[arg(
        long,
        value_name = "PATH",
        help = "Directory with the browser UI served at /"
    )]
    static_dir: Option<PathBuf>,

    #[arg(
        long,
        help = "OTLP endpoint for metrics (e.g., http://localhost:4318)"
    )]
    otlp_endpoint: Option<String>,
}

impl Cli {
    fn into_settings(self) -> Settings {
        Settings {
            listen: SocketAddr::new(self.bind_host, self.http_port),
            backend_host: self.backend_host,
            backend_port: self.backend_port,
            tick: Duration::from_millis(self.tick_ms.max(1)),
            timings: ReplyTimings {
                quiet: Duration::from_millis(self.quiet_ms),
                max: Duration::from_millis(self.max_wait_ms),
                group_list_max: Duration::from_millis(self.group_list_max_wait_ms),
            },
            static_dir: self.static_dir,
            otlp_endpoint: self.otlp_endpoint,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    run(cli.into_settings()).await
}
