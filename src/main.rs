use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "autoballoon-rust",
    version,
    about = "Balloon engineering drawings and build First Article Inspection data"
)]
struct Cli {
    /// Project file (.ab) to open
    #[arg(short = 'p', long = "project")]
    project: Option<PathBuf>,

    /// Run document processing on a page image
    #[arg(long = "process")]
    process: Option<PathBuf>,

    /// Page image used by --detect-region and as revision A for --compare-server
    #[arg(long = "image")]
    image: Option<PathBuf>,

    /// Draw a region (x,y,width,height in percent) and detect its value
    #[arg(long = "detect-region")]
    detect_region: Option<String>,

    /// Value to use when region detection finds nothing
    #[arg(long = "value")]
    value: Option<String>,

    /// Match a CMM report (CSV, tab or space aligned) against the active page
    #[arg(long = "import-cmm")]
    import_cmm: Option<PathBuf>,

    /// Write accepted CMM matches as results
    #[arg(long = "commit")]
    commit: bool,

    /// Reconcile the active page against a revision B image
    #[arg(long = "compare")]
    compare: Option<PathBuf>,

    /// Reconcile using the revision compare service (needs --image)
    #[arg(long = "compare-server")]
    compare_server: Option<PathBuf>,

    /// Write the inspection table as CSV
    #[arg(long = "export-csv")]
    export_csv: Option<PathBuf>,

    /// Export a report through the export service (.pdf, .xlsx or .zip)
    #[arg(long = "export")]
    export: Option<PathBuf>,

    /// Save the project here instead of over --project
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Page to make active
    #[arg(long = "page")]
    page: Option<u32>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    autoballoon_rust::logging::init(cli.verbose)?;

    let config = autoballoon_rust::Config {
        project: cli.project,
        process: cli.process,
        image: cli.image,
        detect_region: cli.detect_region,
        value: cli.value,
        import_cmm: cli.import_cmm,
        commit: cli.commit,
        compare: cli.compare,
        compare_server: cli.compare_server,
        export_csv: cli.export_csv,
        export: cli.export,
        output: cli.output,
        page: cli.page,
        settings_path: cli.read_settings,
    };
    let output = autoballoon_rust::run(config).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
