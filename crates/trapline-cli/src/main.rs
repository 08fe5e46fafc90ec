#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use trapline_cli::{CliAction, CliOpts};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("TRAPLINE_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match cli.action {
        CliAction::Run {
            config,
            program,
            args,
        } => trapline_cli::evaluate_run(
            config,
            program,
            args,
            std::io::stdin().lock(),
            std::io::stdout().lock(),
        )
        .map(Some),
        CliAction::Info { program } => {
            trapline_cli::evaluate_info(&program, std::io::stdout().lock()).map(|_| None)
        }
    };

    match res {
        Ok(Some(exit_code)) => std::process::exit(exit_code),
        Ok(None) => (),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
