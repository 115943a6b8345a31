use std::env;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use console::style;

mod broadcast;
mod script;
mod terminal;

use broadcast::ProcNetDevBroadcastSource;
use script::HomeDirScript;
use terminal::RawModeGuard;

use xkdb_proto::orchestrate::{self, Options, Outcome};

/// Access a Xinu backend with debugger support.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the status table and exit.
    #[arg(long)]
    status: bool,

    /// The type of backend board to connect to (default: $CS_CLASS, else "quark").
    #[arg(long, alias = "class", short = 't', value_name = "CLASS")]
    r#type: Option<String>,

    /// Path to the image to upload before connecting.
    #[arg(long, default_value = "xinu")]
    xinu: PathBuf,

    /// Path to the local executable the debugger script should load.
    #[arg(long, default_value = "xinu.elf")]
    executable: PathBuf,

    /// Skip power-cycling the backend before connecting.
    #[arg(long)]
    no_powercycle: bool,

    /// Skip uploading the image before connecting.
    #[arg(long)]
    no_upload: bool,

    /// Specific backend to target.
    #[arg(value_name = "BACKEND")]
    backend: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let class = orchestrate::resolve_class(args.r#type.clone(), |key| env::var(key).ok());
    let opts = Options {
        class,
        user: env::var("USER").unwrap_or_else(|_| "xkdb".to_string()),
        backend_name: args.backend.clone(),
        image_path: args.xinu.as_path(),
        executable_path: args.executable.as_path(),
        status_only: args.status,
        powercycle: !args.no_powercycle,
        upload: !args.no_upload,
    };

    let home = env::var("HOME").map(PathBuf::from).context("HOME is not set")?;
    let script = HomeDirScript { home };

    let outcome =
        orchestrate::run(&opts, &ProcNetDevBroadcastSource, &script).context("setting up session")?;

    match outcome {
        Outcome::Status(table) => {
            print!("{table}");
            Ok(())
        }
        Outcome::Diagnostic(message) => {
            println!("{}", style(message).red());
            Ok(())
        }
        Outcome::Connected { mut tunnel, debugger_port } => {
            println!(
                "{}",
                style(format!("GDB server listening on localhost:{debugger_port}")).green()
            );

            let stdin = io::stdin();
            let _raw_guard =
                RawModeGuard::enable(stdin.as_raw_fd()).context("entering raw terminal mode")?;

            tunnel.run(stdin, io::stdout()).context("running interactive session")
        }
    }
}
