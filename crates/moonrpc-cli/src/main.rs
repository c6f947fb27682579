//! # moonrpc CLI Entry Point
//!
//! Serves and calls the built-in demo service.
//!
//! ## Usage
//!
//! ```bash
//! # Export moonrpc.demo.EchoService on port 9100
//! moonrpc serve --bind 127.0.0.1:9100
//!
//! # Call it point-to-point (outputs raw JSON)
//! moonrpc call direct://127.0.0.1:9100 echo '"hello"'
//! moonrpc call direct://127.0.0.1:9100 add 2 3
//! ```

use anyhow::Result;
use argh::FromArgs;

#[derive(FromArgs)]
/// moonrpc - registry-driven RPC demo
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Serve**: export the demo service and wait for Ctrl-C
/// - **Call**: make a single call (unix-friendly JSON output)
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for exporting the demo service.
///
/// # Example
///
/// ```bash
/// moonrpc serve --bind 0.0.0.0:9100 --max-workers 32
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// export the demo echo service
struct ServeArgs {
    /// address to bind the server to
    ///
    /// Port 0 assigns a random available port; the bound address is logged
    /// at startup.
    #[argh(option, short = 'b', default = "\"127.0.0.1:9100\".into()")]
    bind: String,

    /// registry to register the service with (repeatable)
    ///
    /// Only in-process registries exist, so this is mostly useful for
    /// `local://` experiments; `moonrpc call` connects directly.
    #[argh(option, short = 'r', long = "registry")]
    registries: Vec<String>,

    /// maximum number of requests executing at once
    #[argh(option, long = "max-workers", default = "200")]
    max_workers: usize,
}

/// Arguments for making a single call.
///
/// Positional arguments are parsed as JSON; words that are not valid JSON
/// are sent as strings. The result is printed as raw JSON to stdout and
/// errors go to stderr with a non-zero exit code.
///
/// # Examples
///
/// ```bash
/// moonrpc call direct://127.0.0.1:9100 echo hello
/// moonrpc call --retries 2 direct://127.0.0.1:9100 add 2 3 | jq .
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a running server
struct CallArgs {
    /// target as direct://host:port[/interface]
    #[argh(positional)]
    target: String,

    /// name of the method to call
    #[argh(positional)]
    method: String,

    /// JSON arguments
    #[argh(positional)]
    args: Vec<String>,

    /// request timeout in milliseconds
    #[argh(option, short = 't', long = "timeout", default = "1000")]
    timeout_ms: u64,

    /// retries after a framework failure (enables failover)
    #[argh(option, long = "retries", default = "0")]
    retries: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    tracing::info!("Starting {} on {}", moonrpc_cli::ECHO_SERVICE, args.bind);

    let mut service = moonrpc_cli::serve(&args.bind, &args.registries, args.max_workers).await?;
    if let Some(url) = service.exported_url() {
        tracing::info!("Serving at {}", url.uri());
        tracing::info!("Try: moonrpc call direct://{} echo hello", url.socket_addr());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    service.unexport().await;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let target = moonrpc_cli::CallTarget::parse(&args.target)?;
    let call_args = moonrpc_cli::parse_args(&args.args);

    let result = moonrpc_cli::call(&target, &args.method, call_args, args.timeout_ms, args.retries).await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let args: Cli = Cli::from_args(&["moonrpc"], &["serve"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs { bind, registries, max_workers }) => {
                assert_eq!(bind, "127.0.0.1:9100");
                assert!(registries.is_empty());
                assert_eq!(max_workers, 200);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_with_options() {
        let args: Cli = Cli::from_args(&["moonrpc"], &[
            "serve",
            "-b", "0.0.0.0:9200",
            "--registry", "local://127.0.0.1/registry",
            "--max-workers", "8",
        ]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs { bind, registries, max_workers }) => {
                assert_eq!(bind, "0.0.0.0:9200");
                assert_eq!(registries, vec!["local://127.0.0.1/registry".to_string()]);
                assert_eq!(max_workers, 8);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(&["moonrpc"], &[
            "call", "direct://127.0.0.1:9100", "add", "2", "3",
        ]).unwrap();
        match args.command {
            Commands::Call(CallArgs { target, method, args, timeout_ms, retries }) => {
                assert_eq!(target, "direct://127.0.0.1:9100");
                assert_eq!(method, "add");
                assert_eq!(args, vec!["2".to_string(), "3".to_string()]);
                assert_eq!(timeout_ms, 1000);
                assert_eq!(retries, 0);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_without_args() {
        let args: Cli = Cli::from_args(&["moonrpc"], &[
            "call", "--timeout", "250", "--retries", "2", "direct://127.0.0.1:9100", "echo",
        ]).unwrap();
        match args.command {
            Commands::Call(CallArgs { args, timeout_ms, retries, .. }) => {
                assert!(args.is_empty());
                assert_eq!(timeout_ms, 250);
                assert_eq!(retries, 2);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_requires_method() {
        assert!(Cli::from_args(&["moonrpc"], &["call", "direct://127.0.0.1:9100"]).is_err());
    }
}
