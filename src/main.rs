// Local ICAO PKD mirror: Passive Authentication, DB/LDAP reconciliation
// and certificate revalidation from one command line entry point.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use icao_local_pkd::config::{ConfigStore, Settings};
use icao_local_pkd::crypto::certs::CertificateInfo;
use icao_local_pkd::crypto::{CrlInfo, SodParser};
use icao_local_pkd::models::{PaRequest, PaResult, TriggerSource};
use icao_local_pkd::pa::{parse_data_group_contents, PaVerifier};
use icao_local_pkd::parsers::{dg2, MrzParser};
use icao_local_pkd::scheduler::{DailyScheduler, Schedule};
use icao_local_pkd::store::Database;
use icao_local_pkd::trust::ldap::decode_certificate_value;
use icao_local_pkd::trust::{
    CrlProvider, CscaProvider, FixedTrustStore, LdapCrlProvider, LdapCscaProvider,
};
use icao_local_pkd::{PkdError, SyncService};

#[derive(Parser)]
#[command(
    name = "icao-local-pkd",
    about = "Local ICAO PKD mirror with Passive Authentication"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run Passive Authentication over a verification request file
    Verify {
        /// JSON request: {"sod": base64, "dataGroups": {...}, ...}
        #[arg(long)]
        input: PathBuf,
        /// CSCA certificate files (PEM or DER) for offline verification;
        /// without them the configured LDAP directory is used
        #[arg(long)]
        csca: Vec<PathBuf>,
        /// CRL files as COUNTRY=path pairs for offline verification
        #[arg(long)]
        crl: Vec<String>,
        /// Persist the verification to the database
        #[arg(long)]
        store: bool,
    },
    /// Parse MRZ text (2 or 3 lines, whitespace ignored)
    ParseMrz {
        #[arg(long)]
        text: String,
    },
    /// Parse a binary DG1 data group
    ParseDg1 {
        #[arg(long)]
        file: PathBuf,
    },
    /// Parse a binary DG2 data group and report the embedded images
    ParseDg2 {
        #[arg(long)]
        file: PathBuf,
    },
    /// Inspect a binary SOD: DSC, algorithms and data group hashes
    ParseSod {
        #[arg(long)]
        file: PathBuf,
    },
    /// Compare DB and LDAP statistics and persist the snapshot
    Check,
    /// Mirror pending certificates into the LDAP tree
    Reconcile {
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-check expiry across stored validation results
    Revalidate,
    /// Run the daily scheduler in the foreground
    Serve,
    /// Update the persisted scheduler configuration
    SetConfig {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        hour: Option<u8>,
        #[arg(long)]
        minute: Option<u8>,
        #[arg(long)]
        auto_reconcile: Option<bool>,
        #[arg(long)]
        revalidate: Option<bool>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), PkdError> {
    match command {
        Command::Verify {
            input,
            csca,
            crl,
            store,
        } => verify_command(&input, &csca, &crl, store),
        Command::ParseMrz { text } => {
            let mrz = MrzParser::parse_text(&text)?;
            println!("{}", to_pretty_json(&mrz)?);
            Ok(())
        }
        Command::ParseDg1 { file } => {
            let mrz = MrzParser::parse_dg1(&fs::read(&file)?)?;
            println!("{}", to_pretty_json(&mrz)?);
            Ok(())
        }
        Command::ParseDg2 { file } => {
            let images = dg2::parse_dg2(&fs::read(&file)?)?;
            for (index, image) in images.iter().enumerate() {
                println!(
                    "Image {}: {} ({}x{}, {} bytes)",
                    index + 1,
                    image.mime_type(),
                    image.width.map(|w| w.to_string()).unwrap_or_else(|| "?".to_string()),
                    image.height.map(|h| h.to_string()).unwrap_or_else(|| "?".to_string()),
                    image.data.len()
                );
            }
            Ok(())
        }
        Command::ParseSod { file } => parse_sod_command(&file),
        Command::Check => {
            let service = sync_service()?;
            let status = service.run_check()?;
            println!("{}", to_pretty_json(&status)?);
            Ok(())
        }
        Command::Reconcile { dry_run } => {
            let service = sync_service()?;
            let summary =
                service.run_reconciliation(TriggerSource::Manual, dry_run, None)?;
            println!(
                "Reconciliation {}: {} added, {} failed ({})",
                summary.id,
                summary.success_count,
                summary.failed_count,
                summary.status.as_str()
            );
            Ok(())
        }
        Command::Revalidate => {
            let service = sync_service()?;
            let outcome = service.run_revalidation()?;
            println!("{}", to_pretty_json(&outcome)?);
            Ok(())
        }
        Command::Serve => serve_command(),
        Command::SetConfig {
            enabled,
            hour,
            minute,
            auto_reconcile,
            revalidate,
            batch_size,
        } => {
            let config = Arc::new(ConfigStore::new(Settings::from_env()?));
            let mut database = Database::connect(&config.snapshot().db)?;
            config.load_db_overrides(&mut database)?;

            let mut row = config.snapshot().to_row();
            if let Some(enabled) = enabled {
                row.daily_sync_enabled = enabled;
            }
            if let Some(hour) = hour {
                row.daily_sync_hour = hour;
            }
            if let Some(minute) = minute {
                row.daily_sync_minute = minute;
            }
            if let Some(auto_reconcile) = auto_reconcile {
                row.auto_reconcile = auto_reconcile;
            }
            if let Some(revalidate) = revalidate {
                row.revalidate_certs_on_sync = revalidate;
            }
            if let Some(batch_size) = batch_size {
                row.max_reconcile_batch_size = batch_size;
            }
            let updated = config.update(row, &mut database)?;
            println!(
                "Configuration saved: daily sync {} at {:02}:{:02} (reconcile {}, revalidate {}, batch {}). \
                 A running scheduler picks this up on restart.",
                if updated.daily_sync_enabled { "enabled" } else { "disabled" },
                updated.daily_sync_hour,
                updated.daily_sync_minute,
                updated.auto_reconcile,
                updated.revalidate_certs_on_sync,
                updated.max_reconcile_batch_size
            );
            Ok(())
        }
    }
}

fn sync_service() -> Result<SyncService, PkdError> {
    let config = Arc::new(ConfigStore::new(Settings::from_env()?));
    if let Ok(mut database) = Database::connect(&config.snapshot().db) {
        config.load_db_overrides(&mut database)?;
    }
    Ok(SyncService::new(config))
}

fn verify_command(
    input: &PathBuf,
    csca_files: &[PathBuf],
    crl_specs: &[String],
    persist: bool,
) -> Result<(), PkdError> {
    let request: PaRequest = serde_json::from_str(&fs::read_to_string(input)?)
        .map_err(|e| PkdError::Io(format!("unreadable verification request: {}", e)))?;
    let settings = Settings::from_env()?;

    let result = if csca_files.is_empty() {
        let verifier = PaVerifier::new(
            LdapCscaProvider::new(settings.ldap_read.clone()),
            LdapCrlProvider::new(settings.ldap_read.clone()),
        );
        execute_verification(&verifier, &request, persist, &settings)?
    } else {
        let mut trust = FixedTrustStore::new();
        for path in csca_files {
            trust.add_csca(load_certificate(path)?);
        }
        for spec in crl_specs {
            let (country, path) = spec.split_once('=').ok_or_else(|| {
                PkdError::Config(format!("CRL spec '{}' is not COUNTRY=path", spec))
            })?;
            trust.add_crl(country, CrlInfo::from_der(&fs::read(path)?)?);
        }
        let verifier = PaVerifier::new(trust.clone(), trust);
        execute_verification(&verifier, &request, persist, &settings)?
    };

    print_verification_report(&result);
    println!("{}", to_pretty_json(&result)?);

    if let Ok(groups) = request.decode_data_groups() {
        let parsed = parse_data_group_contents(&groups);
        if parsed.mrz.is_some() || !parsed.face_images.is_empty() {
            println!("{}", to_pretty_json(&parsed)?);
        }
    }
    Ok(())
}

fn execute_verification<C: CscaProvider, R: CrlProvider>(
    verifier: &PaVerifier<C, R>,
    request: &PaRequest,
    persist: bool,
    settings: &Settings,
) -> Result<PaResult, PkdError> {
    if persist {
        let mut database = Database::connect(&settings.db)?;
        Ok(verifier.verify_and_store(request, &mut database))
    } else {
        Ok(verifier.verify(request))
    }
}

fn load_certificate(path: &PathBuf) -> Result<CertificateInfo, PkdError> {
    decode_certificate_value(&fs::read(path)?)
}

fn parse_sod_command(file: &PathBuf) -> Result<(), PkdError> {
    let sod = fs::read(file)?;
    let dsc = CertificateInfo::from_der(&SodParser::extract_dsc(&sod)?)?;
    let hash_algorithm = SodParser::hash_algorithm(&sod)?;
    let signature_algorithm = SodParser::signature_algorithm(&sod)?;

    println!("DSC subject:   {}", dsc.subject_dn);
    println!("DSC issuer:    {}", dsc.issuer_dn);
    println!("DSC serial:    {}", dsc.serial);
    println!("Valid:         {} .. {}", dsc.not_before, dsc.not_after);
    println!("Hash:          {} ({})", hash_algorithm.name, hash_algorithm.oid);
    println!("Signature:     {}", signature_algorithm);
    println!("Data group hashes:");
    for (number, hash) in SodParser::dg_hashes(&sod)? {
        println!("  DG{:<2} {}", number, hex::encode(hash));
    }
    Ok(())
}

fn serve_command() -> Result<(), PkdError> {
    let config = Arc::new(ConfigStore::new(Settings::from_env()?));
    if let Ok(mut database) = Database::connect(&config.snapshot().db) {
        config.load_db_overrides(&mut database)?;
    }
    let settings = config.snapshot();
    if !settings.daily_sync_enabled {
        return Err(PkdError::Scheduler(
            "daily sync is disabled in the configuration".to_string(),
        ));
    }

    let service = SyncService::new(Arc::clone(&config));
    let schedule = Schedule {
        hour: settings.daily_sync_hour,
        minute: settings.daily_sync_minute,
    };
    let _scheduler = DailyScheduler::start(schedule, move |trigger: TriggerSource| {
        service.daily_tick(trigger);
    })?;
    info!(
        "serving; daily tick at {:02}:{:02} local time",
        schedule.hour, schedule.minute
    );

    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, PkdError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PkdError::Io(format!("serialization failed: {}", e)))
}

// Human-readable summary in addition to the JSON payload.
fn print_verification_report(result: &PaResult) {
    println!("\n===============================================");
    println!("      PASSIVE AUTHENTICATION REPORT");
    println!("===============================================\n");

    println!("DOCUMENT:");
    println!(
        "  Issuing Country: {}",
        result.issuing_country.as_deref().unwrap_or("-")
    );
    println!(
        "  Document Number: {}",
        result.document_number.as_deref().unwrap_or("-")
    );

    println!("\nVERIFICATION STEPS:");
    println!(
        "  1. Trust Chain:    {}",
        if result.certificate_chain_validation.valid {
            "PASSED"
        } else {
            "FAILED"
        }
    );
    println!(
        "  2. SOD Signature:  {}",
        if result.sod_signature_validation.valid {
            "PASSED"
        } else {
            "FAILED"
        }
    );
    println!(
        "  3. Data Groups:    {}/{} valid",
        result.data_group_validation.valid, result.data_group_validation.total
    );
    println!("  4. CRL Status:     {}", result.crl_check.status.as_str());

    if !result.errors.is_empty() {
        println!("\nFINDINGS:");
        for error in &result.errors {
            println!("  - [{}] {}", error.code, error.message);
        }
    }

    println!(
        "\nVerification result: {} ({} ms)",
        result.status.as_str(),
        result.processing_duration_ms
    );
}
