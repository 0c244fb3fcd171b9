//! ca-issuer CLI application.
//!
//! This binary issues certificates from CSRs with the configured
//! intermediate CA and queries the issuance ledger.

use ca_issuer::cert::loader::CaKeyMaterial;
use ca_issuer::error::{IssuerError, Result, StorageError};
use ca_issuer::storage::record::IssuedCertificate;
use ca_issuer::{Issuer, IssuerConfig};
use clap::{ArgGroup, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ca-issuer")]
#[command(about = "Issue X.509 certificates from CSRs with an intermediate CA", long_about = None)]
struct Cli {
    /// Configuration file (defaults apply if it does not exist)
    #[arg(long, global = true, default_value = "ca-issuer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a certificate for a CSR
    Issue {
        /// PEM-encoded CSR file
        #[arg(long)]
        csr: PathBuf,

        /// Declared content type of the upload
        #[arg(long)]
        content_type: Option<String>,

        /// Output certificate file (default: <common name>.crt)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the intermediate CA certificate
    CaCert {
        /// Output file (if not specified, prints to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show one issuance record
    #[command(group(ArgGroup::new("key").required(true).args(["id", "serial"])))]
    Show {
        /// Record id
        #[arg(long)]
        id: Option<String>,

        /// Serial number, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_serial)]
        serial: Option<u64>,
    },

    /// List all issuance records
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ca_issuer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Issue {
            csr,
            content_type,
            output,
        } => handle_issue(&config, &csr, content_type.as_deref(), output).await,
        Commands::CaCert { output } => handle_ca_cert(&config, output.as_deref()),
        Commands::Show { id, serial } => handle_show(&config, id, serial).await,
        Commands::List => handle_list(&config).await,
    }
}

fn load_config(path: &Path) -> Result<IssuerConfig> {
    let config = IssuerConfig::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(config.rebase(base))
}

async fn handle_issue(
    config: &IssuerConfig,
    csr_path: &Path,
    content_type: Option<&str>,
    output: Option<PathBuf>,
) -> Result<()> {
    let issuer = Issuer::from_config(config)?;
    let csr_bytes = fs::read(csr_path).map_err(StorageError::from)?;
    let filename = csr_path.file_name().and_then(|name| name.to_str());

    let issuance = issuer
        .issue_upload(content_type, filename, &csr_bytes)
        .await?;

    let output = output.unwrap_or_else(|| PathBuf::from(issuance.download_name()));
    fs::write(&output, &issuance.certificate_pem).map_err(StorageError::from)?;

    println!("Issued certificate for: {}", issuance.record.common_name);
    println!("Record id: {}", issuance.id());
    println!("Serial: {}", issuance.record.serial_hex());
    println!("Expires: {}", issuance.record.expire_time.to_rfc3339());
    println!("Written to: {}", output.display());

    Ok(())
}

fn handle_ca_cert(config: &IssuerConfig, output: Option<&Path>) -> Result<()> {
    let material = CaKeyMaterial::load(&config.ca.key_path, &config.ca.cert_path)?;

    match output {
        Some(path) => {
            fs::write(path, material.certificate_pem()).map_err(StorageError::from)?;
            println!("CA certificate written to: {}", path.display());
        }
        None => print!("{}", material.certificate_pem()),
    }

    Ok(())
}

async fn handle_show(config: &IssuerConfig, id: Option<String>, serial: Option<u64>) -> Result<()> {
    let issuer = Issuer::from_config(config)?;

    let record = match (id, serial) {
        (Some(id), _) => issuer.lookup(&id).await?,
        (None, Some(serial)) => issuer
            .find_by_serial(serial)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("serial {:#x}", serial)))?,
        (None, None) => {
            return Err(IssuerError::Configuration(
                "Either --id or --serial is required".to_string(),
            ))
        }
    };

    let json = serde_json::to_string_pretty(&record).map_err(StorageError::from)?;
    println!("{}", json);

    Ok(())
}

async fn handle_list(config: &IssuerConfig) -> Result<()> {
    let issuer = Issuer::from_config(config)?;
    let records = issuer.list().await?;

    if records.is_empty() {
        println!("No certificates issued");
        return Ok(());
    }

    println!("Issued certificates:");
    for record in &records {
        print_summary(record);
    }

    Ok(())
}

fn print_summary(record: &IssuedCertificate) {
    println!(
        "  {}  serial={}  expires={}  {}",
        record.id,
        record.serial_hex(),
        record.expire_time.format("%Y-%m-%d"),
        record.common_name
    );
}

fn parse_serial(value: &str) -> std::result::Result<u64, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid serial '{}': {}", value, e))
}
