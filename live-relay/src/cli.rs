//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::extension::SKIP_DOWNLOAD_FLAG;
use crate::settings::DEFAULT_SETTINGS_FILE;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE)]
    pub config: PathBuf,

    /// Do not download missing extension dependencies.
    /// Set automatically when a restart follows failed downloads.
    #[arg(long = "skip-download-dependency")]
    pub skip_download_dependency: bool,

    /// Log directory, overrides the settings file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Extra arguments, kept for restarts
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub rest: Vec<String>,
}

impl Args {
    /// Whether dependency download is disabled by this invocation.
    pub fn skip_download(&self) -> bool {
        self.skip_download_dependency || self.rest.iter().any(|a| a == SKIP_DOWNLOAD_FLAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["live-relay"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_SETTINGS_FILE));
        assert!(!args.skip_download());
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn test_skip_flag() {
        let args = Args::try_parse_from(["live-relay", "--config", "a.toml", SKIP_DOWNLOAD_FLAG]).unwrap();
        assert!(args.skip_download());
        assert_eq!(args.config, PathBuf::from("a.toml"));
    }

    #[test]
    fn test_trailing_args_are_kept() {
        let args = Args::try_parse_from(["live-relay", "--log-dir", "l", "--", "--extra", "x"]).unwrap();
        assert_eq!(args.rest, vec!["--extra", "x"]);
        assert_eq!(args.log_dir, Some(PathBuf::from("l")));
    }
}
