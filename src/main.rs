//! shell-exec binary entry point.

use std::io::Write;
use std::process::ExitCode;

use shell_exec::cli::{self, Args, TIMEOUT_EXIT_STATUS};
use shell_exec::config::Config;
use shell_exec::{logging, CheckPolicy, ExecError, ExecResult, ExecutionRequest};
use tracing::{debug, error};

const USAGE_EXIT_STATUS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-exec --help' for more information.");
            return ExitCode::from(USAGE_EXIT_STATUS);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }

    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let command_line = match args.command_line() {
        Ok(line) => line,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-exec --help' for more information.");
            return ExitCode::from(USAGE_EXIT_STATUS);
        }
    };

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(USAGE_EXIT_STATUS);
        }
    };

    // A subscriber may already be installed when embedded; that is fine.
    let _ = logging::try_init_with(config.log_filter());

    debug!("shell-exec v{}", env!("CARGO_PKG_VERSION"));

    match run(&args, command_line, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(USAGE_EXIT_STATUS)
        }
    }
}

async fn run(
    args: &Args,
    command_line: String,
    config: &Config,
) -> Result<u8, Box<dyn std::error::Error>> {
    let executor = config.build_executor()?;

    let mut request = ExecutionRequest::new(command_line).verbose(args.verbose);
    if let Some(ref dir) = args.cwd {
        request = request.working_dir(dir);
    }

    let mut policy = CheckPolicy::new().raise_on_err(false);
    if !args.expect.is_empty() {
        policy = policy.expected(args.expect.iter().copied());
    }

    match executor.check_call(&request, &policy).await {
        Ok(result) => {
            write_output(&result)?;
            Ok(cli::exit_status_byte(result.exit_code().unwrap_or(-1)))
        }
        Err(ExecError::Timeout { result, .. }) => {
            write_output(&result)?;
            Ok(TIMEOUT_EXIT_STATUS)
        }
        Err(e) => Err(e.into()),
    }
}

fn write_output(result: &ExecResult) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&result.stdout_bin())?;
    stdout.flush()?;

    let mut stderr = std::io::stderr().lock();
    stderr.write_all(&result.stderr_bin())?;
    stderr.flush()
}
