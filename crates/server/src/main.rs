//! CLI and HTTP entry point for the preservation service.
//!
//! Without `--serve` the binary preserves the given paths once and exits
//! non-zero on failure. With `--serve` it exposes `POST /preserve`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use preserva_core::aps::{processing_config, ApsClient, GrpcTransferRpc, ProcessingConfig};
use preserva_core::{
    AdsClient, AtomConfig, Config, PreservationConfig, PreserveRunner, Preserver, RequestService,
    RestCms, RestCmsOptions, ServiceArgs,
};

use preserva_server::api;
use preserva_server::state::AppState;

#[derive(Parser, Debug)]
#[command(
    name = "preserva",
    version,
    about = "Preservation pipeline: packages CMS content, submits it to the archival \
             processing service and delivers DIPs to the description system."
)]
struct Cli {
    /// Start the HTTP server.
    #[arg(long)]
    serve: bool,

    /// HTTP listen address (with --serve).
    #[arg(long, default_value = ":6905")]
    addr: String,

    /// Clean up intermediate artefacts after each run.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    cleanup: bool,

    /// Allow insecure TLS connections (for testing only).
    #[arg(long)]
    allow_insecure_tls: bool,

    /// CMS username (required without --serve).
    #[arg(short = 'u', long)]
    cells_username: Option<String>,

    /// CMS paths to preserve; may be given multiple times.
    #[arg(short = 'p', long)]
    cells_path: Vec<String>,

    /// CMS directory the finished AIP is uploaded to.
    #[arg(short = 'a', long)]
    cells_archive_dir: Option<String>,

    /// Wrap the extracted AIP in a ZIP archive.
    #[arg(long)]
    compress_aip: bool,

    // Processing-service flags.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_assign_uuids_to_directories: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    aps_examine_contents: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_generate_transfer_structure_report: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_document_empty_directories: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_extract_packages: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    aps_delete_packages_after_extraction: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_identify_transfer: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_identify_submission_and_metadata: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_identify_before_normalization: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_normalize: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_transcribe_files: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_perform_policy_checks_on_originals: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_perform_policy_checks_on_preservation_derivatives: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    aps_perform_policy_checks_on_access_derivatives: bool,
    /// Thumbnail mode: generate, generate_non_default or do_not_generate.
    #[arg(long, default_value = "generate")]
    aps_thumbnail_mode: String,

    // Description-system flags.
    #[arg(long)]
    atom_host: Option<String>,
    #[arg(long)]
    atom_api_key: Option<String>,
    #[arg(long)]
    atom_login_email: Option<String>,
    #[arg(long)]
    atom_login_password: Option<String>,
    #[arg(long)]
    atom_rsync_target: Option<String>,
    #[arg(long)]
    atom_rsync_command: Option<String>,
    #[arg(long)]
    atom_slug: Option<String>,
}

impl Cli {
    fn processing_config(&self) -> ProcessingConfig {
        ProcessingConfig {
            assign_uuids_to_directories: self.aps_assign_uuids_to_directories,
            examine_contents: self.aps_examine_contents,
            generate_transfer_structure_report: self.aps_generate_transfer_structure_report,
            document_empty_directories: self.aps_document_empty_directories,
            extract_packages: self.aps_extract_packages,
            delete_packages_after_extraction: self.aps_delete_packages_after_extraction,
            identify_transfer: self.aps_identify_transfer,
            identify_submission_and_metadata: self.aps_identify_submission_and_metadata,
            identify_before_normalization: self.aps_identify_before_normalization,
            normalize: self.aps_normalize,
            transcribe_files: self.aps_transcribe_files,
            perform_policy_checks_on_originals: self.aps_perform_policy_checks_on_originals,
            perform_policy_checks_on_preservation_derivatives: self
                .aps_perform_policy_checks_on_preservation_derivatives,
            perform_policy_checks_on_access_derivatives: self
                .aps_perform_policy_checks_on_access_derivatives,
            thumbnail_mode: parse_thumbnail_mode(&self.aps_thumbnail_mode) as i32,
            // Compression is fixed until it surfaces at the user level.
            aip_compression_level: 1,
            aip_compression_algorithm:
                processing_config::AipCompressionAlgorithm::S7Copy as i32,
        }
    }

    fn atom_config(&self) -> AtomConfig {
        AtomConfig {
            host: self.atom_host.clone().unwrap_or_default(),
            api_key: self.atom_api_key.clone().unwrap_or_default(),
            login_email: self.atom_login_email.clone().unwrap_or_default(),
            login_password: self.atom_login_password.clone().unwrap_or_default(),
            rsync_target: self.atom_rsync_target.clone().unwrap_or_default(),
            rsync_command: self.atom_rsync_command.clone().unwrap_or_default(),
            slug: self.atom_slug.clone().unwrap_or_default(),
        }
    }
}

fn parse_thumbnail_mode(mode: &str) -> processing_config::ThumbnailMode {
    use processing_config::ThumbnailMode;
    match mode {
        "generate" => ThumbnailMode::Generate,
        "generate_non_default" => ThumbnailMode::GenerateNonDefault,
        "do_not_generate" => ThumbnailMode::DoNotGenerate,
        _ => ThumbnailMode::Unspecified,
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let level = match config.log_level.as_str() {
        "fatal" | "panic" => "error",
        other => other,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.log_file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

/// `:6905` style addresses bind on every interface.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!("Fatal error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    init_logging(&config)?;

    if cli.allow_insecure_tls {
        config.allow_insecure_tls = true;
    }
    if let Some(dir) = &cli.cells_archive_dir {
        config.cells_archive_workspace = dir.clone();
    }

    // Description-system settings: CLI flags win over the config file.
    let file_atom = match &config.atom_config_path {
        Some(path) => AtomConfig::load_file(path)
            .map_err(|e| anyhow::anyhow!("loading atom config: {e}"))?,
        None => AtomConfig::default(),
    };
    let atom = cli.atom_config().overlay(&file_atom);

    let cms = Arc::new(
        RestCms::connect(RestCmsOptions {
            allow_insecure_tls: config.allow_insecure_tls,
            ..RestCmsOptions::new(
                config.cells_address.clone(),
                config.cells_admin_token.clone(),
                config.cells_cec_path.clone(),
            )
        })
        .await
        .context("connecting to CMS")?,
    );
    let aps = ApsClient::new(GrpcTransferRpc::connect(&config.a3m_address)?);
    let ads = Arc::new(AdsClient::new(config.allow_insecure_tls)?);

    let config = Arc::new(config);
    let preserver = Preserver::new(cms, aps, ads, Arc::clone(&config));
    let runner: Arc<dyn PreserveRunner> = Arc::new(RequestService::new(preserver));

    if cli.serve {
        let state = Arc::new(AppState::new(runner, config.cleanup, atom));
        let app = api::create_router(state);
        let addr = normalize_addr(&cli.addr);
        info!(%addr, "starting HTTP server");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        axum::serve(listener, app).await.context("server error")?;
        return Ok(());
    }

    let Some(username) = cli.cells_username.clone() else {
        bail!("--cells-username is required without --serve");
    };
    if cli.cells_path.is_empty() {
        bail!("--cells-path is required without --serve");
    }

    let args = ServiceArgs {
        username,
        paths: cli.cells_path.clone(),
        nodes: Vec::new(),
        cleanup: cli.cleanup,
        allow_insecure_tls: cli.allow_insecure_tls,
        paths_resolved: false,
        preservation: PreservationConfig {
            compress_aip: cli.compress_aip,
            a3m: cli.processing_config(),
        },
        atom,
    };

    runner
        .run_args(CancellationToken::new(), args)
        .await
        .context("running preservation")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_without_host_bind_everywhere() {
        assert_eq!(normalize_addr(":6905"), "0.0.0.0:6905");
        assert_eq!(normalize_addr("127.0.0.1:8080"), "127.0.0.1:8080");
    }

    #[test]
    fn thumbnail_mode_parsing() {
        use processing_config::ThumbnailMode;
        assert_eq!(parse_thumbnail_mode("generate"), ThumbnailMode::Generate);
        assert_eq!(
            parse_thumbnail_mode("generate_non_default"),
            ThumbnailMode::GenerateNonDefault
        );
        assert_eq!(
            parse_thumbnail_mode("do_not_generate"),
            ThumbnailMode::DoNotGenerate
        );
        assert_eq!(parse_thumbnail_mode("bogus"), ThumbnailMode::Unspecified);
    }

    #[test]
    fn cli_defaults_match_the_processing_defaults() {
        let cli = Cli::parse_from(["preserva", "--serve"]);
        assert_eq!(
            cli.processing_config(),
            preserva_core::config::default_processing_config()
        );
        assert!(cli.cleanup);
        assert!(!cli.compress_aip);
    }

    #[test]
    fn repeatable_path_flag() {
        let cli = Cli::parse_from([
            "preserva",
            "-u",
            "admin",
            "-p",
            "personal-files/a",
            "-p",
            "personal-files/b",
        ]);
        assert_eq!(cli.cells_username.as_deref(), Some("admin"));
        assert_eq!(cli.cells_path.len(), 2);
    }
}
