//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use docharvest_core::batch::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use docharvest_core::config::DEFAULT_DATA_ROOT;
use docharvest_core::download::DEFAULT_MAX_ATTEMPTS;
use docharvest_core::resolver::{MarkdownVariant, SniffSettings};
use docharvest_core::{
    ConfigError, DataLayout, FetchSettings, PageStrategy, PipelineConfig, ResolverSettings,
    ResumePolicy,
};

/// Page resolver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolverKind {
    /// Markdown links whose label and URL both mention `.pdf` (markdown or plain-text pages)
    Markdown,
    /// Markdown links whose label mentions "pdf" in any case (markdown or plain-text pages)
    MarkdownToken,
    /// Watch network responses for PDFs, then fall back to anchors
    Sniff,
}

impl ResolverKind {
    fn strategy(self) -> PageStrategy {
        match self {
            Self::Markdown => PageStrategy::Markdown(MarkdownVariant::LabelAndUrl),
            Self::MarkdownToken => PageStrategy::Markdown(MarkdownVariant::LabelToken),
            Self::Sniff => PageStrategy::Sniff,
        }
    }
}

/// Where the target list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// IDs `start..end` substituted into a URL template.
    Range {
        start: u64,
        end: u64,
        template: String,
    },
    /// `{ key: { "links": [...] } }` JSON file.
    LinksJson(PathBuf),
    /// One URL per line.
    UrlList(PathBuf),
    /// URLs from arguments, or stdin when none were given.
    Direct(Vec<String>),
}

/// Resumable batch download of documents linked from web pages.
///
/// Each target page is resolved into document links, every link is
/// downloaded with retries, and outcomes are written to
/// `<data-root>/<source>/results.json` so re-runs skip finished targets.
#[derive(Parser, Debug)]
#[command(name = "docharvest")]
#[command(author, version, about)]
pub struct Args {
    /// Target page URLs (read from stdin when omitted)
    #[arg(conflicts_with_all = ["start", "links_json", "url_list"])]
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Name of this source; results go to <data-root>/<source>/
    #[arg(short, long, default_value = "default")]
    pub source: String,

    /// Root directory for per-source data
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    /// First ID of a numeric range (inclusive)
    #[arg(long, requires_all = ["end", "template"], conflicts_with_all = ["links_json", "url_list"])]
    pub start: Option<u64>,

    /// End of a numeric range (exclusive)
    #[arg(long, requires = "start")]
    pub end: Option<u64>,

    /// URL template for ranges, e.g. https://site/item/{id} or {id:05}
    #[arg(long, requires = "start")]
    pub template: Option<String>,

    /// JSON file mapping keys to {"links": [...]}
    #[arg(long, conflicts_with = "url_list")]
    pub links_json: Option<PathBuf>,

    /// Text file with one URL per line
    #[arg(long)]
    pub url_list: Option<PathBuf>,

    /// How target pages are searched for document links; the markdown kinds read the page body as text, so use sniff for HTML pages
    #[arg(short, long, value_enum, default_value_t = ResolverKind::Markdown)]
    pub resolver: ResolverKind,

    /// Do not rewrite Google Drive share links into direct downloads
    #[arg(long)]
    pub no_share_links: bool,

    /// Download attempts per link (1-10); the n-th retry waits at least 2^(n-1) seconds
    #[arg(short = 'a', long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub attempts: u32,

    /// Per-request download timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,

    /// Page render timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub render_timeout: u64,

    /// Share-link confirmation probe timeout in seconds
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub probe_timeout: u64,

    /// Navigation attempts per page for the sniff resolver (1-10)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub sniff_attempts: u32,

    /// Milliseconds to keep observing a page after it loads (sniff resolver)
    #[arg(long, default_value_t = 5000)]
    pub settle_ms: u64,

    /// Do not navigate again when a page yields no document (sniff resolver)
    #[arg(long)]
    pub no_retry_empty: bool,

    /// Targets processed at once (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=MAX_CONCURRENCY as i64))]
    pub concurrency: u8,

    /// Stop retrying targets with no link after this many runs
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub give_up_after: Option<u32>,

    /// Hide the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// The selected target source.
    #[must_use]
    pub fn target_source(&self) -> TargetSource {
        if let (Some(start), Some(end), Some(template)) = (self.start, self.end, &self.template) {
            TargetSource::Range {
                start,
                end,
                template: template.clone(),
            }
        } else if let Some(path) = &self.links_json {
            TargetSource::LinksJson(path.clone())
        } else if let Some(path) = &self.url_list {
            TargetSource::UrlList(path.clone())
        } else {
            TargetSource::Direct(self.urls.clone())
        }
    }

    /// Builds the run configuration from the flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the source name or a value is invalid.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let layout = DataLayout::new(self.data_root.clone(), self.source.clone())?;
        let config = PipelineConfig {
            fetch: FetchSettings {
                max_attempts: self.attempts,
                request_timeout: Duration::from_secs(self.timeout),
                ..FetchSettings::default()
            },
            resolver: ResolverSettings {
                strategy: self.resolver.strategy(),
                rewrite_share_links: !self.no_share_links,
                render_timeout: Duration::from_secs(self.render_timeout),
                probe_timeout: Duration::from_secs(self.probe_timeout),
                sniff: SniffSettings {
                    max_attempts: self.sniff_attempts,
                    settle_delay: Duration::from_millis(self.settle_ms),
                    retry_on_empty: !self.no_retry_empty,
                    ..SniffSettings::default()
                },
                stop_signal: None,
            },
            resume: ResumePolicy {
                give_up_after_runs: self.give_up_after,
            },
            concurrency: usize::from(self.concurrency),
            ..PipelineConfig::new(layout)
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["docharvest"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.source, "default");
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.attempts, 5);
        assert_eq!(args.resolver, ResolverKind::Markdown);
        assert_eq!(args.target_source(), TargetSource::Direct(vec![]));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["docharvest", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["docharvest", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_range_source() {
        let args = Args::try_parse_from([
            "docharvest",
            "--start",
            "3",
            "--end",
            "9",
            "--template",
            "https://site.test/item/{id}",
        ])
        .unwrap();
        assert_eq!(
            args.target_source(),
            TargetSource::Range {
                start: 3,
                end: 9,
                template: "https://site.test/item/{id}".to_string()
            }
        );
    }

    #[test]
    fn test_cli_range_requires_template() {
        let err = Args::try_parse_from(["docharvest", "--start", "1", "--end", "2"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_sources_conflict() {
        let err = Args::try_parse_from([
            "docharvest",
            "--links-json",
            "a.json",
            "--url-list",
            "b.txt",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let err = Args::try_parse_from(["docharvest", "https://x.test/", "--url-list", "b.txt"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        assert!(Args::try_parse_from(["docharvest", "-c", "16"]).is_ok());
        assert!(Args::try_parse_from(["docharvest", "-c", "17"]).is_err());
        assert!(Args::try_parse_from(["docharvest", "-c", "0"]).is_err());
    }

    #[test]
    fn test_cli_pipeline_config_maps_flags() {
        let args = Args::try_parse_from([
            "docharvest",
            "--source",
            "reports",
            "--data-root",
            "/tmp/harvest",
            "-r",
            "sniff",
            "--no-share-links",
            "-a",
            "3",
            "--settle-ms",
            "250",
            "--give-up-after",
            "4",
            "-c",
            "2",
        ])
        .unwrap();
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.layout.source(), "reports");
        assert_eq!(config.layout.results_path(), PathBuf::from("/tmp/harvest/reports/results.json"));
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.resolver.strategy, PageStrategy::Sniff);
        assert!(!config.resolver.rewrite_share_links);
        assert_eq!(config.resolver.sniff.settle_delay, Duration::from_millis(250));
        assert_eq!(config.resume.give_up_after_runs, Some(4));
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn test_cli_attempt_ceiling_keeps_backoff_doubling() {
        assert!(Args::try_parse_from(["docharvest", "-a", "11"]).is_err());
        assert!(Args::try_parse_from(["docharvest", "--sniff-attempts", "11"]).is_err());

        let args = Args::try_parse_from(["docharvest", "-a", "10"]).unwrap();
        let policy = args.pipeline_config().unwrap().fetch.retry_policy();
        assert_eq!(policy.max_attempts(), 10);
        for retry in 1..10 {
            assert!(
                policy.backoff_floor(retry) >= Duration::from_secs(1 << (retry - 1)),
                "retry {retry} waits less than 2^{} s",
                retry - 1
            );
        }
    }

    #[test]
    fn test_cli_resolver_help_points_html_pages_at_sniff() {
        use clap::CommandFactory;

        let command = Args::command();
        let help = command
            .get_arguments()
            .find(|arg| arg.get_id() == "resolver")
            .and_then(|arg| arg.get_help())
            .map(ToString::to_string)
            .unwrap();
        assert!(help.contains("use sniff for HTML pages"), "help: {help}");
    }

    #[test]
    fn test_cli_pipeline_config_rejects_bad_source() {
        let args = Args::try_parse_from(["docharvest", "--source", "../x"]).unwrap();
        assert!(args.pipeline_config().is_err());
    }
}
