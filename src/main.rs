use carousel::config::Config;
use carousel::server::ProxyServer;
use carousel::target::TargetList;
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;
use tokio::time::Duration;

#[derive(Parser)]
#[clap(
    version,
    about = "An HTTP load balancing reverse proxy that cycles requests over upstream targets"
)]
struct Args {
    #[clap(
        short,
        long,
        value_name = "ADDR",
        help = "Listen address, either a port number or host:port (e.g. 8888 or 127.0.0.1:8888)"
    )]
    listen: Option<String>,

    #[clap(
        short,
        long,
        value_name = "FILE",
        help = "File with one upstream target URL per line"
    )]
    targets: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(
        long,
        value_name = "SECONDS",
        help = "Upstream response timeout in seconds"
    )]
    timeout: Option<u64>,

    #[clap(
        long,
        value_name = "FILE",
        help = "Generate a sample configuration file"
    )]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(config_file) = args.generate_config {
        generate_sample_config(&config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = if let Some(config_file) = &args.config {
        if !Path::new(config_file).exists() {
            return Err(format!("Configuration file not found: {}", config_file).into());
        }
        Config::from_file(config_file)?
    } else {
        config_from_args(&args)?
    };

    let targets = load_targets(&config)?;
    let addr = config.listen_addr;
    let timeout_secs = args.timeout.or(config.upstream_timeout_secs).unwrap_or(30);

    info!("Starting round robin load balancer...");
    let server =
        ProxyServer::new(targets).with_upstream_timeout(Duration::from_secs(timeout_secs));

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(addr).await {
            eprintln!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        result = server_handle => {
            if let Err(e) = result {
                eprintln!("Server task error: {}", e);
            }
        }
    }

    info!("Load balancer stopped.");
    Ok(())
}

fn config_from_args(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let listen = args.listen.as_deref().unwrap_or("127.0.0.1:8888");
    let listen_addr = parse_listen_addr(listen)?;

    let targets_file = match &args.targets {
        Some(file) => Some(file.into()),
        None => {
            return Err("no upstream targets configured; pass --targets FILE or --config FILE".into());
        }
    };

    Ok(Config {
        listen_addr,
        targets: Vec::new(),
        targets_file,
        upstream_timeout_secs: args.timeout,
    })
}

fn parse_listen_addr(listen: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    if let Ok(port) = listen.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    Ok(listen.parse()?)
}

fn load_targets(config: &Config) -> Result<TargetList, Box<dyn std::error::Error>> {
    if !config.targets.is_empty() {
        return Ok(TargetList::load(config.targets.iter().map(String::as_str))?);
    }
    if let Some(file) = &config.targets_file {
        let blob = std::fs::read_to_string(file)?;
        return Ok(TargetList::from_lines(&blob)?);
    }
    Err("no upstream targets configured".into())
}

fn generate_sample_config(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = r#"{
  "listen_addr": "127.0.0.1:8888",
  "targets": [
    "http://127.0.0.1:9001",
    "http://127.0.0.1:9002"
  ],
  "upstream_timeout_secs": 30
}"#;
    std::fs::write(file_path, sample)?;
    Ok(())
}
