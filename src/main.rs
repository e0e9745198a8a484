//! Launch installed applications in their sandbox.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{self, ExitStatus};

use clap::{Parser, Subcommand, ValueHint};
use pharaoh::capabilities::BusInterface;
use pharaoh::{CapabilitySet, Error, Launcher, Layout, LinuxHost, Manifest};

/// Default log filter.
const DEFAULT_LOG_FILTER: &str = "warn";

/// Environment variable overriding the log filter.
const LOG_ENV: &str = "PHARAOH_LOG";

/// Exit status section of the `run` help.
const RUN_EXIT_STATUS: &str = "\
EXIT STATUS:
    The exit status of the application is passed through unchanged. An application killed by a
    signal exits with 128 plus the signal number.

    Launch failures exit with 69 (capability unavailable), 71 (syscall filter), 76 (D-Bus
    proxy), 77 (namespaces), 78 (configuration), 126 (executable) or 130 (cancelled). An
    application may exit with the same codes, the error message on stderr tells them apart.";

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Directory of application install roots.
    #[clap(long, env = "PHARAOH_APP_DIR", value_name = "DIR", value_hint = ValueHint::DirPath)]
    app_dir: Option<PathBuf>,

    /// Directory of application data directories.
    #[clap(long, env = "PHARAOH_DATA_DIR", value_name = "DIR", value_hint = ValueHint::DirPath)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity.
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an application inside its sandbox.
    #[clap(after_help = RUN_EXIT_STATUS)]
    Run {
        /// Application identity.
        app: String,

        /// Arguments for the application.
        #[clap(value_parser, allow_hyphen_values = true, multiple_values = true)]
        args: Vec<OsString>,
    },

    /// Show an application's manifest.
    Info {
        /// Application identity.
        app: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let mut layout = Layout::from_env();
    if let Some(app_dir) = cli.app_dir {
        layout.app_dir = app_dir;
    }
    if let Some(data_dir) = cli.data_dir {
        layout.data_dir = data_dir;
    }

    let result = match cli.command {
        Command::Run { app, args } => run(layout, &app, args),
        Command::Info { app } => info(&layout, &app).map(|()| 0),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("pharaoh: {err}");
            process::exit(err.exit_code());
        },
    }
}

/// Launch an application and wait for it, returning its exit code.
fn run(layout: Layout, app: &str, args: Vec<OsString>) -> Result<i32, Error> {
    let manifest = Manifest::load(layout.manifest_path(app))?;
    let host = LinuxHost::new()?;

    let session = Launcher::new(manifest, layout, host).args(args).launch()?;
    let status = session.wait().map_err(|source| Error::Privilege {
        operation: "wait for the sandbox",
        source,
    })?;

    Ok(exit_code(status))
}

/// Print the manifest of an application.
fn info(layout: &Layout, app: &str) -> Result<(), Error> {
    let manifest = Manifest::load(layout.manifest_path(app))?;

    println!("app:          {}", manifest.app());
    println!("root:         {}", manifest.root().display());
    println!("executable:   {}", manifest.executable().display());
    println!("capabilities: {}", names(manifest.capabilities()));
    if let Some(filter) = manifest.seccomp_filter() {
        println!("filter:       {}", filter.display());
    }
    if let Some(name) = manifest.bus_name() {
        println!("bus name:     {name}");
    }

    let bus = manifest.bus_capabilities();
    let interfaces: Vec<_> =
        bus.interfaces().into_iter().map(|BusInterface { interface, .. }| interface).collect();
    println!("bus grants:   {}", names(bus));
    if !interfaces.is_empty() {
        println!("interfaces:   {}", interfaces.join(", "));
    }

    Ok(())
}

/// Human readable list of granted capabilities.
fn names<C: CapabilitySet>(set: C) -> String {
    let mut names: Vec<String> =
        set.granted().into_iter().filter_map(|flag| flag.name()).map(String::from).collect();
    if set.unknown_bits() != 0 {
        names.push(format!("unknown({:#x})", set.unknown_bits()));
    }

    if names.is_empty() {
        String::from("none")
    } else {
        names.join(", ")
    }
}

/// Exit code mirroring the sandbox's exit status.
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

fn init_logger(verbose: u8) {
    let filter = match verbose {
        0 => DEFAULT_LOG_FILTER,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env = env_logger::Env::new().filter_or(LOG_ENV, filter);
    env_logger::Builder::from_env(env).format_timestamp(None).init();
}
