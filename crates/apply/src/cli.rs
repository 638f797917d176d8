use clap::Parser;

const SUBST_HELP: &str = "\
  Default (-a or positional) substitution options:
    %P full path to <item> (i.e., verbatim <item>)
    %B base name of <item> (full path w/o extension)
    %D directory of <item>
    %F file name of <item> (w/o directory)
    %N name of <item> (base name w/o directory)
    %E extension of <item>

  Argument file (-f) substitution options:
    %0 first element on line
    %1 second element on line
    %2 third element on line
    %3 fourth element on line
    %4 fifth element on line
    %5 sixth element on line
    %6 seventh element on line
    %7 eighth element on line

  Machine list (-m) substitution options:
    %M machine name";

#[derive(Parser)]
#[command(
    name = "apply",
    version,
    about = "Apply a command to multiple items in parallel",
    after_help = SUBST_HELP
)]
pub struct Cli {
    /// Report output sequentially per process
    #[arg(short = 's', long)]
    pub sequential: bool,

    /// Tag output lines with item names
    #[arg(short = 'n', long)]
    pub names: bool,

    /// Tag output lines with timestamps
    #[arg(short = 't', long)]
    pub times: bool,

    /// Show more info on termination
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Command to apply
    #[arg(short = 'c', long)]
    pub command: Option<String>,

    /// Arguments (paths)
    #[arg(
        short = 'a',
        long = "args",
        conflicts_with_all = ["arg_file", "machines"]
    )]
    pub args: Vec<String>,

    /// File containing argument lines
    #[arg(
        short = 'f',
        long = "arg-file",
        conflicts_with_all = ["args", "machines"]
    )]
    pub arg_file: Option<std::path::PathBuf>,

    /// Target machines (via ssh)
    #[arg(
        short = 'm',
        long = "machines",
        conflicts_with_all = ["args", "arg_file"]
    )]
    pub machines: Vec<String>,

    /// Force IPv4 with -m's ssh
    #[arg(short = '4', long)]
    pub ipv4: bool,

    /// Force IPv6 with -m's ssh
    #[arg(short = '6', long)]
    pub ipv6: bool,

    /// Run with shell
    #[arg(short = 'S', long)]
    pub shell: bool,

    /// Kill hung subprocesses
    #[arg(short = 'K', long)]
    pub kill_hung: bool,

    /// Enable signal-testing features
    #[arg(long)]
    pub signal_test: bool,

    /// Command and its arguments, when not given via -c
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub remaining: Vec<String>,
}
