use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shm_dict::{Namespace, NamespaceOptions, PosixShm, Scalar, ShDict, ShList, Value};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let DictCommand { prefix, command } = DictCommand::parse();

    match run(prefix, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("shm-dict: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Inspect and modify containers in POSIX shared memory.
///
/// Lock timeouts and the name prefix are read from `SHM_DICT_LOCK_ATTEMPTS`,
/// `SHM_DICT_LOCK_INTERVAL_MS` and `SHM_DICT_PREFIX`. Log output is configured with `RUST_LOG`.
#[derive(Parser)]
struct DictCommand {
    /// Override the segment name prefix.
    #[arg(long)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the value of a key of a map.
    Get { container: String, key: String },
    /// Set a key of a map to a scalar.
    ///
    /// The value is `null`, `true`, `false`, an integer, a float, or otherwise a string.
    Set {
        container: String,
        key: String,
        value: String,
    },
    /// Remove a key of a map.
    Del { container: String, key: String },
    /// Append a scalar to a list.
    Append { container: String, value: String },
    /// Print a whole container.
    Dump {
        container: String,
        /// The container is a list, not a map.
        #[arg(long)]
        list: bool,
    },
    /// Overwrite a container with an empty one.
    Clear {
        container: String,
        #[arg(long)]
        list: bool,
    },
    /// List the segments of the namespace.
    Segments { prefix: Option<String> },
}

fn run(prefix: Option<String>, command: Command) -> shm_dict::Result<()> {
    let mut options = NamespaceOptions::from_env()?;
    if let Some(prefix) = prefix {
        options.prefix = prefix;
    }

    let ns = Namespace::new(PosixShm::new(), options);

    match command {
        Command::Get { container, key } => {
            let item = ShDict::open(&ns, container)?.get_item(&key)?;
            println!("{}", item.into_value()?);
        }
        Command::Set {
            container,
            key,
            value,
        } => {
            ShDict::open(&ns, container)?.set(key, parse_scalar(&value))?;
        }
        Command::Del { container, key } => {
            if !ShDict::open(&ns, container)?.delete(&key)? {
                eprintln!("no key `{key}`");
            }
        }
        Command::Append { container, value } => {
            ShList::open(&ns, container)?.append(parse_scalar(&value))?;
        }
        Command::Dump { container, list } => {
            let value = if list {
                Value::List(ShList::open(&ns, container)?.to_values()?)
            } else {
                Value::Dict(ShDict::open(&ns, container)?.to_map()?)
            };
            println!("{value}");
        }
        Command::Clear { container, list } => {
            if list {
                ShList::create(&ns, container, vec![])?;
            } else {
                ShDict::create(&ns, container, BTreeMap::new())?;
            }
        }
        Command::Segments { prefix } => {
            let prefix = prefix.unwrap_or_default();
            for name in ns.segments()? {
                if name.starts_with(&prefix) {
                    println!("{name}");
                }
            }
        }
    }

    Ok(())
}

fn parse_scalar(text: &str) -> Scalar {
    match text {
        "null" => Scalar::None,
        "true" => Scalar::Bool(true),
        "false" => Scalar::Bool(false),
        _ => {
            if let Ok(int) = text.parse() {
                Scalar::Int(int)
            } else if let Ok(float) = text.parse() {
                Scalar::Float(float)
            } else {
                Scalar::Str(text.to_owned())
            }
        }
    }
}
