//! docsign-agent command line.
//!
//! Usage:
//!   docsign-agent list [--all]
//!   docsign-agent sign --cert-index 0 --file contract.txt
//!   docsign-agent serve --port 17357
//!   docsign-agent pdf-sign --input in.pdf --output out.pdf --cert-index 0
//!   docsign-agent verify-pdf --input out.pdf
//!   docsign-agent enroll --subject "CN=Alice" --pin-protect

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{WarnLevel, Verbosity};
use docsign_agent::agent::{AgentEvent, AgentHost};
use docsign_agent::certificates::{enroll, CertificateSelector, EnrollOptions};
use docsign_agent::config::{AgentConfig, PinPromptMode};
use docsign_agent::pin::{ConsolePrompter, Pin, PinPrompter, PinRegistry};
use docsign_agent::service::SigningService;
use docsign_agent::signatures::verify_pdf;
use docsign_agent::stamp::PdfStampOptions;
use std::ffi::OsString;
use std::io::BufRead;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "docsign-agent")]
#[command(about = "Local document signing agent", version)]
struct Cli {
    /// Certificate store directory (overrides the configuration file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct SelectorArgs {
    /// Index in the `list` output
    #[arg(long)]
    cert_index: Option<usize>,

    /// SHA-1 thumbprint
    #[arg(long)]
    thumbprint: Option<String>,
}

impl SelectorArgs {
    fn selector(&self) -> CertificateSelector {
        match (&self.thumbprint, self.cert_index) {
            (Some(thumbprint), _) => CertificateSelector::Thumbprint(thumbprint.clone()),
            (None, index) => CertificateSelector::Index(index.unwrap_or_default()),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List certificates
    List {
        /// Include certificates without a private key
        #[arg(long)]
        all: bool,
    },

    /// Write a detached signature of FILE to FILE.p7s
    Sign {
        #[command(flatten)]
        selector: SelectorArgs,

        /// File to sign
        #[arg(long)]
        file: PathBuf,

        /// Read the PIN from the first line of stdin
        #[arg(long)]
        pin_stdin: bool,
    },

    /// Run the loopback HTTP agent
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Allow binding a non-loopback address
        #[arg(long)]
        allow_remote: bool,

        /// What to do when a request needs a PIN
        #[arg(long, value_enum)]
        pin_prompt: Option<PinPromptArg>,
    },

    /// Stamp and sign a PDF
    PdfSign {
        /// PDF to sign
        #[arg(long)]
        input: PathBuf,

        /// Where to write the signed PDF
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        selector: SelectorArgs,

        #[command(flatten)]
        stamp: StampArgs,

        /// Also write the CMS signature to OUTPUT.p7s
        #[arg(long)]
        p7s: bool,

        /// Read the PIN from the first line of stdin
        #[arg(long)]
        pin_stdin: bool,
    },

    /// Check the signatures of a PDF
    VerifyPdf {
        /// PDF to check
        #[arg(long)]
        input: PathBuf,
    },

    /// Create a self-signed certificate and key in the store
    Enroll {
        /// Subject, e.g. "CN=Alice,O=Example"
        #[arg(long)]
        subject: String,

        /// Encrypt the key with a PIN asked on the terminal
        #[arg(long)]
        pin_protect: bool,

        /// RSA key size
        #[arg(long, default_value_t = 2048)]
        key_bits: usize,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// File name stem in the store
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Args, Debug)]
struct StampArgs {
    /// Protocol number (default: NS-<local time>)
    #[arg(long)]
    protocol: Option<String>,

    /// Header text on every page
    #[arg(long)]
    watermark: Option<String>,

    /// Footer note on every page
    #[arg(long)]
    footer_note: Option<String>,

    /// Checklist line in the signature block (repeatable)
    #[arg(long = "action")]
    actions: Vec<String>,

    /// Signing reason
    #[arg(long)]
    reason: Option<String>,

    /// Signing location
    #[arg(long)]
    location: Option<String>,

    /// Signer display name
    #[arg(long)]
    signer_name: Option<String>,

    /// Signature field name
    #[arg(long)]
    field_name: Option<String>,

    /// Signature type label
    #[arg(long)]
    signature_type: Option<String>,

    /// Authentication label
    #[arg(long)]
    authentication: Option<String>,

    /// 1-based page for the signature (default: last)
    #[arg(long)]
    page: Option<usize>,

    /// Signature block width; 0 makes the signature invisible
    #[arg(long)]
    width: Option<f64>,

    /// Signature block height; 0 makes the signature invisible
    #[arg(long)]
    height: Option<f64>,

    /// Distance from the right page edge
    #[arg(long)]
    margin_x: Option<f64>,

    /// Distance from the bottom page edge
    #[arg(long)]
    margin_y: Option<f64>,
}

impl StampArgs {
    fn options(&self) -> PdfStampOptions {
        let defaults = PdfStampOptions::default();
        PdfStampOptions {
            watermark: self.watermark.clone(),
            protocol: self.protocol.clone(),
            footer_note: self.footer_note.clone(),
            actions: self.actions.clone(),
            reason: self.reason.clone(),
            location: self.location.clone(),
            signer_name: self.signer_name.clone(),
            field_name: self.field_name.clone(),
            signature_type: self.signature_type.clone(),
            authentication: self.authentication.clone(),
            signature_page: self.page,
            signature_width: self.width.unwrap_or(defaults.signature_width),
            signature_height: self.height.unwrap_or(defaults.signature_height),
            signature_margin_x: self.margin_x.unwrap_or(defaults.signature_margin_x),
            signature_margin_y: self.margin_y.unwrap_or(defaults.signature_margin_y),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PinPromptArg {
    /// Answer pin_required at once
    Defer,
    /// Wait for POST /pin/{id} or the console
    Await,
}

impl From<PinPromptArg> for PinPromptMode {
    fn from(arg: PinPromptArg) -> Self {
        match arg {
            PinPromptArg::Defer => PinPromptMode::Defer,
            PinPromptArg::Await => PinPromptMode::Await,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .parse_default_env()
        .init();

    // User-facing failures are reported, not signalled through the exit code
    if let Err(err) = run(cli).await {
        eprintln!("error: {:#}", err);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::new(),
    };
    if let Some(store) = cli.store {
        config = config.with_store(store);
    }

    match cli.command {
        Commands::List { all } => list(&config, all),
        Commands::Sign {
            selector,
            file,
            pin_stdin,
        } => sign(&config, &selector.selector(), &file, pin_stdin).await,
        Commands::Serve {
            port,
            bind,
            allow_remote,
            pin_prompt,
        } => {
            if let Some(port) = port {
                config = config.with_port(port);
            }
            if let Some(bind) = bind {
                config = config.with_bind(bind);
            }
            if let Some(mode) = pin_prompt {
                config.pin_prompt = mode.into();
            }
            serve(config, allow_remote).await
        },
        Commands::PdfSign {
            input,
            output,
            selector,
            stamp,
            p7s,
            pin_stdin,
        } => pdf_sign(&config, &input, &output, &selector.selector(), stamp.options(), p7s, pin_stdin).await,
        Commands::VerifyPdf { input } => verify(&input),
        Commands::Enroll {
            subject,
            pin_protect,
            key_bits,
            days,
            name,
        } => {
            let mut options = EnrollOptions::new(subject).with_key_bits(key_bits);
            options.validity_days = days;
            if let Some(name) = name {
                options = options.with_file_stem(name);
            }
            if pin_protect {
                options = options.with_pin(read_new_pin()?);
            }
            let path = enroll(&config.store, &options)?;
            println!("Enrolled {}", path.display());
            Ok(())
        },
    }
}

fn list(config: &AgentConfig, all: bool) -> anyhow::Result<()> {
    let service = SigningService::from_config(config);
    let certificates = service.certificates(all)?;
    if certificates.is_empty() {
        println!("No certificates in {}", config.store.display());
        return Ok(());
    }
    for cert in certificates {
        println!("[{}] {}", cert.index, cert.subject);
        println!("    issuer:     {}", cert.issuer);
        println!("    serial:     {}", cert.serial_number);
        println!("    thumbprint: {}", cert.thumbprint);
        println!(
            "    valid:      {} to {}",
            cert.not_before.format("%Y-%m-%d"),
            cert.not_after.format("%Y-%m-%d")
        );
        println!("    key:        {}", cert.key().description());
    }
    Ok(())
}

async fn sign(config: &AgentConfig, selector: &CertificateSelector, file: &Path, pin_stdin: bool) -> anyhow::Result<()> {
    let payload = std::fs::read(file).with_context(|| format!("input not found: {}", file.display()))?;
    let pin = if pin_stdin { read_stdin_pin()? } else { None };
    let service = SigningService::from_config(config);
    let signed = service.sign(&payload, Some(selector), pin, &ConsolePrompter).await?;
    let target = with_suffix(file, ".p7s");
    std::fs::write(&target, &signed.signature.der)?;
    println!("Signed by {} -> {}", signed.signature.subject, target.display());
    Ok(())
}

async fn pdf_sign(
    config: &AgentConfig,
    input: &Path,
    output: &Path,
    selector: &CertificateSelector,
    options: PdfStampOptions,
    p7s: bool,
    pin_stdin: bool,
) -> anyhow::Result<()> {
    let pdf = std::fs::read(input).with_context(|| format!("input not found: {}", input.display()))?;
    let pin = if pin_stdin { read_stdin_pin()? } else { None };
    let service = SigningService::from_config(config);
    let signed = service
        .sign_pdf(pdf, Some(selector), options, pin, &ConsolePrompter, p7s)
        .await?;
    std::fs::write(output, &signed.pdf)?;
    if let Some(der) = &signed.p7s {
        std::fs::write(with_suffix(output, ".p7s"), der)?;
    }
    println!("Signed {} (protocol {})", output.display(), signed.protocol);
    Ok(())
}

fn verify(input: &Path) -> anyhow::Result<()> {
    let pdf = std::fs::read(input).with_context(|| format!("input not found: {}", input.display()))?;
    let reports = verify_pdf(&pdf)?;
    if reports.is_empty() {
        println!("{}: no signatures", input.display());
    }
    for report in reports {
        let status = if report.is_valid() { "valid" } else { "INVALID" };
        println!("{} [{}]", report.field_name, status);
        if let Some(signer) = &report.signer {
            println!("    signer:    {}", signer.subject);
            if let Some(at) = signer.signed_at {
                println!("    signed at: {}", at.to_rfc3339());
            }
        }
        println!("    covers whole file: {}", report.covers_whole_file);
        if let Some(error) = &report.error {
            println!("    error: {}", error);
        }
    }
    Ok(())
}

async fn serve(config: AgentConfig, allow_remote: bool) -> anyhow::Result<()> {
    if !config.bind.is_loopback() && !allow_remote {
        anyhow::bail!(
            "refusing to bind {} without --allow-remote: this exposes private-key operations to the local network",
            config.bind
        );
    }
    let mut host = AgentHost::new(config);
    let console = tokio::spawn(answer_on_console(host.subscribe(), host.registry()));
    let address = host.start().await?;
    println!("Listening on http://{} (Ctrl+C to stop)", address);

    tokio::signal::ctrl_c().await?;
    host.stop().await?;
    console.abort();
    Ok(())
}

/// Answer awaited PIN challenges from the terminal.
async fn answer_on_console(
    mut events: tokio::sync::broadcast::Receiver<AgentEvent>,
    registry: Arc<PinRegistry>,
) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(AgentEvent::PinRequested(challenge)) => {
                let reply = ConsolePrompter.prompt(&challenge).await;
                if let Err(e) = registry.resolve(challenge.id, reply) {
                    log::debug!("console answer dropped: {}", e);
                }
            },
            Ok(_) => {},
            Err(RecvError::Lagged(skipped)) => log::warn!("missed {} agent events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn read_stdin_pin() -> anyhow::Result<Option<Pin>> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let pin = line.trim_end_matches(['\r', '\n']).to_string();
    Ok((!pin.is_empty()).then(|| Pin::new(pin)))
}

fn read_new_pin() -> anyhow::Result<Pin> {
    let first = rpassword::prompt_password("New PIN: ")?;
    let second = rpassword::prompt_password("Repeat PIN: ")?;
    if first != second {
        anyhow::bail!("PINs do not match");
    }
    if first.is_empty() {
        anyhow::bail!("PIN must not be empty");
    }
    Ok(Pin::new(first))
}
