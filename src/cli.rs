//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use ks_downloader_core::config::DEFAULT_SETTINGS_FILE;

/// Resolve Kuaishou share links and download the referenced media.
///
/// Every positional argument is one input of a single batch. Without
/// arguments, piped stdin is read as one batch; an interactive terminal reads
/// one batch per line until an empty line or `Q`.
#[derive(Parser, Debug)]
#[command(name = "ks-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Settings file (created with defaults if missing)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SETTINGS_FILE)]
    pub settings: PathBuf,

    /// Download items even if the download record already has them
    #[arg(short, long)]
    pub force: bool,

    /// Share links or text containing them
    #[arg(value_name = "LINK")]
    pub links: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["ks-downloader"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.force);
        assert_eq!(args.settings, PathBuf::from("settings.json"));
        assert!(args.links.is_empty());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["ks-downloader", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["ks-downloader", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["ks-downloader", "--verbose", "--verbose"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["ks-downloader", "-q"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["ks-downloader", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["ks-downloader", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["ks-downloader", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Input Tests ====================

    #[test]
    fn test_cli_positional_links_collected_in_order() {
        let args = Args::try_parse_from([
            "ks-downloader",
            "v.kuaishou.com/abc",
            "https://www.kuaishou.com/short-video/xyz",
        ])
        .unwrap();
        assert_eq!(
            args.links,
            vec!["v.kuaishou.com/abc", "https://www.kuaishou.com/short-video/xyz"]
        );
    }

    #[test]
    fn test_cli_force_and_settings_flags() {
        let args = Args::try_parse_from([
            "ks-downloader",
            "-f",
            "--settings",
            "/etc/ks/settings.json",
            "v.kuaishou.com/abc",
        ])
        .unwrap();
        assert!(args.force);
        assert_eq!(args.settings, PathBuf::from("/etc/ks/settings.json"));
        assert_eq!(args.links.len(), 1);
    }
}
