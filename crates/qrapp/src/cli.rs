use clap::Parser;

/// Local QR code generator served to the browser, with self-update.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "qrapp", version = crate::VERSION, about)]
pub struct Cli {
    /// Check the local release feed instead of the published releases.
    #[arg(long)]
    pub local_update: bool,

    /// Build a bumped release and serve it as a local release feed.
    #[arg(long)]
    pub serve: bool,

    /// Port for the web UI (defaults to the configured port).
    #[arg(long, value_name = "PORT")]
    pub ui_port: Option<u16>,

    /// Run the update check even on a dev build.
    #[arg(long)]
    pub force_update_check: bool,

    /// Skip the update check.
    #[arg(long, conflicts_with = "force_update_check")]
    pub no_update_check: bool,

    /// Do not open the UI in a browser.
    #[arg(long)]
    pub no_browser: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}
