mod cli;

use clap::Parser;
use cli::Cli;

use apply_core::supervisor::{self, IpPref, ItemSource, RunOptions};
use apply_core::AppError;

fn usage_error(prog: &str, err: &AppError) -> i32 {
    eprintln!("{prog}: {err}");
    err.exit_code()
}

fn read_arg_file(path: &std::path::Path) -> Result<Vec<String>, AppError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AppError::ArgFileUnreadable {
        path: path.display().to_string(),
        source,
    })?;
    Ok(contents.lines().map(|l| l.trim_end().to_string()).collect())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let prog = std::env::args()
        .next()
        .map(|p| {
            std::path::Path::new(&p)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(p)
        })
        .unwrap_or_else(|| "apply".to_string());
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => usage_error(&prog, &err),
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32, AppError> {
    // `-c` takes the command from its own argument and the positional tail
    // (if any) becomes the default item list. Without `-c`, the positional
    // tail *is* the command and there is no default item list (unless
    // overridden by `-a`/`-f`/`-m`, the item list falls back to the
    // singleton empty item).
    let (command, default_items) = if let Some(cmd_str) = &cli.command {
        let command = shlex::split(cmd_str).ok_or(AppError::MissingCommand)?;
        (command, Some(cli.remaining.clone()))
    } else {
        (cli.remaining.clone(), None)
    };

    let source = if let Some(path) = &cli.arg_file {
        Some(ItemSource::ArgFileLines(read_arg_file(path)?))
    } else if !cli.args.is_empty() {
        Some(ItemSource::Paths(cli.args.clone()))
    } else if !cli.machines.is_empty() {
        let pref = if cli.ipv4 {
            IpPref::V4
        } else if cli.ipv6 {
            IpPref::V6
        } else {
            IpPref::Any
        };
        Some(ItemSource::Machines(cli.machines.clone(), pref))
    } else {
        match default_items {
            Some(items) if !items.is_empty() => Some(ItemSource::Default(items)),
            _ => None,
        }
    };

    let resolved = supervisor::resolve(source, command, cli.names)?;

    tracing::info!(
        items = resolved.items.len(),
        sequential = cli.sequential,
        shell = cli.shell,
        "resolved run"
    );

    let options = RunOptions {
        command: resolved.command,
        shell: cli.shell,
        items: resolved.items,
        map: resolved.map,
        sequential: cli.sequential,
        names: cli.names,
        times: cli.times,
        verbose: cli.verbose,
        kill_hung: cli.kill_hung,
        signal_test: cli.signal_test,
    };

    supervisor::run(options)
}
