use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Start,
    Stop,
    Restart,
    Status,
    Logs,
    Reset,
    Backup,
}

pub(crate) struct CliArgs {
    pub(crate) action: Action,
    pub(crate) target: String,
    pub(crate) config_path: PathBuf,
    pub(crate) install_path: Option<PathBuf>,
    pub(crate) tail: usize,
    pub(crate) skip_models: bool,
}

impl From<ArgMatches> for CliArgs {
    fn from(matches: ArgMatches) -> Self {
        let action = match matches
            .get_one::<String>("action")
            .map(String::as_str)
            .unwrap_or_default()
        {
            "start" => Action::Start,
            "stop" => Action::Stop,
            "restart" => Action::Restart,
            "status" => Action::Status,
            "logs" => Action::Logs,
            "reset" => Action::Reset,
            "backup" => Action::Backup,
            // clap's value parser only lets the above through
            other => unreachable!("unexpected action `{other}`"),
        };
        CliArgs {
            action,
            target: matches
                .get_one::<String>("target")
                .cloned()
                .unwrap_or_else(|| "all".to_string()),
            config_path: matches
                .get_one::<PathBuf>("config")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("ragstack.toml")),
            install_path: matches.get_one::<PathBuf>("install-path").cloned(),
            tail: matches.get_one::<usize>("tail").copied().unwrap_or(100),
            skip_models: matches.get_flag("skip-models"),
        }
    }
}

pub(crate) fn configure_cli() -> CliArgs {
    let matches = Command::new("ragstack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("manage the local RAG workshop stack (ollama, chromadb, n8n)")
        .arg(
            Arg::new("action")
                .required(true)
                .value_parser([
                    "start", "stop", "restart", "status", "logs", "reset", "backup",
                ])
                .help("What to do with the stack"),
        )
        .arg(
            Arg::new("target")
                .default_value("all")
                .help("`all` or a single service name"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file (default: ragstack.toml)"),
        )
        .arg(
            Arg::new("install-path")
                .short('p')
                .long("install-path")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Workshop install root, overrides the configured one"),
        )
        .arg(
            Arg::new("tail")
                .long("tail")
                .value_name("LINES")
                .default_value("100")
                .value_parser(value_parser!(usize))
                .help("Number of log lines to show"),
        )
        .arg(
            Arg::new("skip-models")
                .long("skip-models")
                .action(ArgAction::SetTrue)
                .help("Skip model pulls during start"),
        )
        .get_matches();
    matches.into()
}
