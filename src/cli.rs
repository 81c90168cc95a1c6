//! Command-line interface for shell-exec.
//!
//! Uses lexopt for minimal binary size overhead (~34KB).

use std::ffi::OsString;
use std::path::PathBuf;

/// Exit status reported when the command timed out.
pub const TIMEOUT_EXIT_STATUS: u8 = 124;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Timeout in seconds (0 disables the timeout).
    pub timeout: Option<u64>,
    /// Masking rule for the logged command.
    pub mask: Option<String>,
    /// Log the command and its output at info level.
    pub verbose: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Accepted exit codes (default 0).
    pub expect: Vec<i32>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
    /// The command and its arguments.
    pub command: Vec<String>,
}

impl Args {
    /// The shell command line to run.
    ///
    /// A single word is taken as a complete shell command line. Several
    /// words are an argument vector: each is quoted so the shell sees exactly
    /// those words.
    pub fn command_line(&self) -> Result<String, ArgsError> {
        match self.command.as_slice() {
            [] => Err(ArgsError::NoCommand),
            [line] => Ok(line.clone()),
            words => shlex::try_join(words.iter().map(String::as_str))
                .map_err(|e| ArgsError::InvalidValue("command", e.to_string())),
        }
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('v') | Long("verbose") => {
                result.verbose = true;
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                result.timeout = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("timeout", value))?,
                );
            }
            Short('e') | Long("expect") => {
                let value: String = parser.value()?.parse()?;
                result.expect.push(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("expect", value))?,
                );
            }
            Short('m') | Long("mask") => {
                result.mask = Some(parser.value()?.parse()?);
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                // Everything from the first positional on belongs to the command.
                result.command.push(val.string()?);
                for raw in parser.raw_args()? {
                    let word = raw.into_string().map_err(|raw| {
                        ArgsError::UnexpectedArgument(raw.to_string_lossy().into_owned())
                    })?;
                    result.command.push(word);
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Map a command exit code onto a process exit status.
///
/// Signal deaths (negative codes) follow the shell convention `128 + signal`.
pub fn exit_status_byte(code: i32) -> u8 {
    if code < 0 {
        (128 + code.unsigned_abs().min(127)) as u8
    } else {
        code.min(255) as u8
    }
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-exec {version}
Run a command with a timeout, captured output and masked logging

USAGE:
    shell-exec [OPTIONS] [--] <COMMAND>...

    A single COMMAND word is run as a shell command line. Several words are
    run as that exact argument list.

OPTIONS:
    -t, --timeout <SECS>    Kill the command after SECS seconds (0 = never) [default: 3600]
    -m, --mask <REGEX>      Mask the capture groups of REGEX in logged commands
    -e, --expect <CODE>     Accepted exit code, may be repeated [default: 0]
    -C, --cwd <DIR>         Working directory for the command
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -v, --verbose           Log the command and its output at info level
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHELL_EXEC_TIMEOUT      Default timeout in seconds (overrides config)
    SHELL_EXEC_MASK         Masking rule (overrides config)
    SHELL_EXEC_LOG_LEVEL    Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXIT STATUS:
    The command's own exit code, 124 if it timed out, 2 on usage errors.

EXAMPLES:
    # Run with a 10 second budget
    shell-exec -t 10 -- make test

    # Pipelines go in one word
    shell-exec -- 'ps aux | grep sshd'

    # Hide a password in the logs
    shell-exec -v -m '--password=(\S+)' -- mysql --password=secret -e 'select 1'

    # Accept exit codes 0 and 1
    shell-exec -e 0 -e 1 -- grep pattern file.txt
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-exec {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Argument that could not be used.
    UnexpectedArgument(String),
    /// No command was given.
    NoCommand,
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
            Self::NoCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("shell-exec")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.timeout.is_none());
        assert!(result.command.is_empty());
        assert!(!result.verbose);
    }

    #[test]
    fn test_timeout_and_command() {
        let result = parse_args_from(args(&["-t", "5", "--", "ls", "-la"])).unwrap();
        assert_eq!(result.timeout, Some(5));
        assert_eq!(result.command, vec!["ls", "-la"]);
        assert_eq!(result.command_line().unwrap(), "ls -la");
    }

    #[test]
    fn test_single_word_is_shell_line() {
        let result = parse_args_from(args(&["--", "echo a | tr a b"])).unwrap();
        assert_eq!(result.command_line().unwrap(), "echo a | tr a b");
    }

    #[test]
    fn test_words_are_quoted() {
        let result = parse_args_from(args(&["--", "printf", "%s|", "a b"])).unwrap();
        let line = result.command_line().unwrap();
        assert_eq!(
            shlex::split(&line).unwrap(),
            vec!["printf", "%s|", "a b"]
        );
    }

    #[test]
    fn test_no_command() {
        let result = parse_args_from(args(&["-v"])).unwrap();
        assert!(matches!(result.command_line(), Err(ArgsError::NoCommand)));
    }

    #[test]
    fn test_command_flags_not_parsed() {
        let result = parse_args_from(args(&["-v", "grep", "-v", "x"])).unwrap();
        assert!(result.verbose);
        assert_eq!(result.command, vec!["grep", "-v", "x"]);
    }

    #[test]
    fn test_long_options() {
        let result = parse_args_from(args(&[
            "--timeout",
            "0",
            "--mask",
            "pw=(\\S+)",
            "--cwd",
            "/tmp",
            "echo",
        ]))
        .unwrap();
        assert_eq!(result.timeout, Some(0));
        assert_eq!(result.mask.as_deref(), Some("pw=(\\S+)"));
        assert_eq!(result.cwd, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_expect_repeated() {
        let result = parse_args_from(args(&["-e", "0", "-e", "3", "true"])).unwrap();
        assert_eq!(result.expect, vec![0, 3]);
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/config.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_help_and_version_flags() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--help"])).unwrap().help);
        assert!(parse_args_from(args(&["-V"])).unwrap().version);
    }

    #[test]
    fn test_invalid_timeout() {
        let result = parse_args_from(args(&["-t", "soon"]));
        assert!(matches!(result, Err(ArgsError::InvalidValue("timeout", _))));
    }

    #[test]
    fn test_unknown_option() {
        assert!(parse_args_from(args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn test_exit_status_byte() {
        assert_eq!(exit_status_byte(0), 0);
        assert_eq!(exit_status_byte(3), 3);
        assert_eq!(exit_status_byte(300), 255);
        assert_eq!(exit_status_byte(-9), 137);
        assert_eq!(exit_status_byte(-15), 143);
    }
}
