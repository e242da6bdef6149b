//! DEM Controller - 模块集群控制面
//!
//! Usage:
//! - Normal mode: `dem-controller`
//! - With custom port: `dem-controller --port 9090`
//!
//! Logging is controlled by `RUST_LOG` (default `dem_controller=info`);
//! set `LOG_FORMAT=json` for JSON output.

use dem_controller::RuntimeConfig;
use tracing_subscriber::EnvFilter;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("DEM Controller - module fleet control plane");
    println!();
    println!("USAGE:");
    println!("    dem-controller [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    PORT / CONTROLLER_PORT   Listening port (default 8080)");
    println!("    ADMIN_API_KEY            Operator key for /api (header x-access-token)");
    println!("    DATA_DIR                 Store snapshot and controller state directory");
    println!("    DOCKER_PREFIX            Allowed image prefix for create commands");
    println!("    MODULE_NETWORK_NAME      Module network name (suffix match)");
    println!("    RUST_LOG / LOG_FORMAT    Log filter / set to json for JSON logs");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dem_controller=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let config = parse_args();
    init_tracing();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dem_controller::init_and_run_controller(config))
}
