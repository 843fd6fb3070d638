use aikv_client::observability::init_logging;
use aikv_client::{ClientConfig, ClusterClient, Mode, Value};
use anyhow::{bail, Context};
use bytes::Bytes;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line arguments structure
#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<String>,
    seeds: Vec<String>,
    standalone: bool,
    json: bool,
    command: Vec<String>,
    show_help: bool,
    show_version: bool,
}

fn print_help() {
    println!("aikv-cli v{} - cluster-aware command runner", VERSION);
    println!();
    println!("USAGE:");
    println!("    aikv-cli [OPTIONS] COMMAND [ARGS...]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>    Path to configuration file (TOML format)");
    println!("    -s, --seed <ADDR>      Seed node HOST:PORT (repeatable)");
    println!("        --standalone       Talk to a single server instead of a cluster");
    println!("        --json             Print the reply as JSON");
    println!("    -h, --help             Print help information");
    println!("    -v, --version          Print version information");
    println!();
    println!("EXAMPLES:");
    println!("    aikv-cli -s 127.0.0.1:7000 SET foo bar");
    println!("    aikv-cli -s 127.0.0.1:7000 SUNIONSTORE dst {{a}}s1 {{b}}s2");
    println!("    aikv-cli -c client.toml --json INFO");
}

/// Parse command line arguments. Everything from the first positional
/// argument on is the command.
fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                cli.show_help = true;
                return Ok(cli);
            }
            "-v" | "--version" => {
                cli.show_version = true;
                return Ok(cli);
            }
            "-c" | "--config" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("{} requires a file path argument", args[i]);
                };
                cli.config_path = Some(path.clone());
                i += 1;
            }
            "-s" | "--seed" => {
                let Some(seed) = args.get(i + 1) else {
                    bail!("{} requires a HOST:PORT argument", args[i]);
                };
                cli.seeds.push(seed.clone());
                i += 1;
            }
            "--standalone" => cli.standalone = true,
            "--json" => cli.json = true,
            arg if arg.starts_with('-') && cli.command.is_empty() => {
                bail!("unknown option '{}'. Use --help for usage.", arg);
            }
            _ => {
                cli.command = args[i..].to_vec();
                break;
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Load configuration from file and merge with CLI arguments
fn load_config(cli: &CliArgs) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config_path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load config file '{}'", path))?,
        None => ClientConfig::default(),
    };

    // CLI arguments override config file
    if !cli.seeds.is_empty() {
        config = config.with_seeds(cli.seeds.iter().cloned());
    }
    if cli.standalone {
        config = config.with_mode(Mode::Standalone);
    }
    config.validate()?;
    Ok(config)
}

fn render(value: &Value) -> String {
    match value {
        Value::Nil => "(nil)".to_string(),
        Value::Int(i) => format!("(integer) {}", i),
        Value::Bool(b) => format!("(boolean) {}", b),
        Value::Double(d) => format!("(double) {}", d),
        Value::Data(data) => format!("\"{}\"", String::from_utf8_lossy(data)),
        Value::Status(s) => s.clone(),
        Value::Error(msg) => format!("(error) {}", msg),
        Value::Array(items) if items.is_empty() => "(empty array)".to_string(),
        Value::Array(items) => numbered(items.iter().map(render)),
        Value::Set(members) if members.is_empty() => "(empty set)".to_string(),
        Value::Set(members) => numbered(
            members
                .iter()
                .map(|m| format!("\"{}\"", String::from_utf8_lossy(m))),
        ),
        Value::Map(pairs) => numbered(
            pairs
                .iter()
                .map(|(k, v)| format!("{} => {}", render(k), render(v))),
        ),
        Value::Nodes(nodes) => nodes
            .iter()
            .map(|(addr, v)| format!("[{}]\n{}", addr, render(v)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn numbered(items: impl Iterator<Item = String>) -> String {
    items
        .enumerate()
        .map(|(i, item)| format!("{}) {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn run(cli: CliArgs) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    if let Err(e) = init_logging(&config.log_config()?) {
        eprintln!("Warning: {}", e);
    }

    let Some((command, args)) = cli.command.split_first() else {
        bail!("no command given. Use --help for usage.");
    };
    let args: Vec<Bytes> = args.iter().map(|a| Bytes::from(a.clone())).collect();

    let client = ClusterClient::connect(&config)
        .await
        .context("failed to connect")?;
    let reply = client.dispatch(command, &args).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reply.to_json())?);
    } else {
        println!("{}", render(&reply));
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&argv) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.show_help {
        print_help();
        return;
    }
    if cli.show_version {
        println!("aikv-cli {}", VERSION);
        return;
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
