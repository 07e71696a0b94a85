/// Parsed command-line arguments.
pub struct CliArgs {
    /// Path to configuration file, if provided via `--config-path` or `-c`.
    pub config_path: Option<String>,
    /// `Some(true)` for `--worker`, `Some(false)` for `--no-worker`, `None` to follow config.
    pub worker: Option<bool>,
    /// Whether help was requested.
    pub help_requested: bool,
}

impl CliArgs {
    /// Parse command-line arguments.
    ///
    /// Supported flags:
    /// - `--config-path <path>` or `--config-path=<path>` or `-c <path>`: Path to config file
    /// - `--worker` / `--no-worker`: Force queue processing on or off
    /// - `--help` or `-h`: Print help and exit
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    fn from_args(args: &[String]) -> Self {
        let help_requested = args.iter().any(|a| a == "--help" || a == "-h");

        // Last flag wins.
        let worker = args.iter().skip(1).fold(None, |acc, a| match a.as_str() {
            "--worker" => Some(true),
            "--no-worker" => Some(false),
            _ => acc,
        });

        Self {
            config_path: Self::extract_config_path(args),
            worker,
            help_requested,
        }
    }

    /// Print usage information to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage: userhub-backend [--config-path PATH] [--worker | --no-worker] [--help]\n\n\
             --config-path, -c    Path to configuration file (overrides USERHUB_CONFIG_PATH env var)\n\
             --worker             Process queued jobs in this process (default from config)\n\
             --no-worker          Only accept and enqueue jobs; never process them"
        );
    }

    fn extract_config_path(args: &[String]) -> Option<String> {
        let mut i = 1usize;
        while i < args.len() {
            let a = &args[i];
            if let Some(stripped) = a.strip_prefix("--config-path=") {
                return Some(stripped.to_string());
            } else if a == "--config-path" || a == "-c" {
                if i + 1 < args.len() {
                    return Some(args[i + 1].clone());
                }
                return None;
            } else if let Some(stripped) = a.strip_prefix("-c=") {
                return Some(stripped.to_string());
            }
            i += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("userhub-backend")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_config_path_forms() {
        assert_eq!(
            CliArgs::from_args(&args(&["-c", "a.toml"])).config_path.as_deref(),
            Some("a.toml")
        );
        assert_eq!(
            CliArgs::from_args(&args(&["--config-path=b.yaml"]))
                .config_path
                .as_deref(),
            Some("b.yaml")
        );
        assert!(CliArgs::from_args(&args(&["--config-path"]))
            .config_path
            .is_none());
    }

    #[test]
    fn parses_worker_flags() {
        assert_eq!(CliArgs::from_args(&args(&[])).worker, None);
        assert_eq!(CliArgs::from_args(&args(&["--no-worker"])).worker, Some(false));
        assert_eq!(
            CliArgs::from_args(&args(&["--no-worker", "--worker"])).worker,
            Some(true)
        );
        assert!(CliArgs::from_args(&args(&["-h"])).help_requested);
    }
}
