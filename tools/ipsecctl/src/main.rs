// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ipsecctl - DPU IPsec SA provisioning CLI
//!
//! # Usage
//!
//! ```bash
//! # Install an ESP tunnel SA
//! ipsecctl --addr 10.0.0.1:50151 --tls /etc/dpu/tls add-sa \
//!     --src 192.168.50.1 --dst 192.168.50.2 --spi 0x100 --proto esp \
//!     --mode tunnel --enc-alg aes-gcm16 --enc-key 0x0011...
//!
//! # Remove it
//! ipsecctl --addr 10.0.0.1:50151 --tls /etc/dpu/tls del-sa \
//!     --dst 192.168.50.2 --spi 0x100 --proto esp
//!
//! # Using configuration file
//! ipsecctl --config ipsecctl.toml del-sa --dst 192.168.50.2 --spi 256 --proto 50
//! ```
//!
//! The remote acknowledgment is printed to stdout as received. Failures exit
//! with a status identifying the error kind (see [`exit_code`]).

mod config;

use clap::{Parser, Subcommand};
use config::{CliConfig, ConfigError};
use dpu_ipsec::{
    Acknowledgment, Connector, EncryptionAlgorithm, IntegrityAlgorithm, IpsecMode, IpsecProtocol,
    KeyMaterial, SaClient, SaDeletionKey, SaDescriptor, SaError, TriState, ValidationError,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const EXIT_USAGE: u8 = 2;
const EXIT_CREDENTIAL: u8 = 3;
const EXIT_CONNECTION: u8 = 4;
const EXIT_TRANSPORT: u8 = 5;
const EXIT_REJECTED: u8 = 6;
const EXIT_DEADLINE: u8 = 7;

/// DPU IPsec SA provisioning client
#[derive(Parser, Debug)]
#[command(name = "ipsecctl")]
#[command(about = "Install and remove IPsec SAs on a DPU over TLS")]
#[command(version)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct GlobalArgs {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// IPsec service address [default: localhost:50151]
    #[arg(long, global = true)]
    addr: Option<String>,

    /// TLS credentials: cert:key:ca, or a directory with client.crt, client.key, ca.crt
    #[arg(long, global = true)]
    tls: Option<String>,

    /// Per-call deadline in seconds [default: 10]
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a Security Association
    AddSa(AddSaArgs),

    /// Remove a Security Association
    DelSa(DelSaArgs),

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "ipsecctl.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file given with --config
    ValidateConfig,
}

#[derive(clap::Args, Debug)]
struct AddSaArgs {
    /// Source address
    #[arg(long, default_value = "")]
    src: String,

    /// Destination address
    #[arg(long, default_value = "")]
    dst: String,

    /// Security Parameter Index (decimal or 0x-hex)
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    spi: u32,

    /// Protocol: esp, ah, ipcomp, or numeric code
    #[arg(long)]
    proto: Option<IpsecProtocol>,

    /// XFRM interface id
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    if_id: u32,

    /// Request id tying the SA to its policy
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    reqid: u32,

    /// Mode: transport, tunnel, beet, pass, drop, or numeric code
    #[arg(long)]
    mode: Option<IpsecMode>,

    /// Network interface to bind the SA to
    #[arg(long)]
    interface: Option<String>,

    /// Encryption algorithm name or IKEv2 transform id
    #[arg(long)]
    enc_alg: Option<EncryptionAlgorithm>,

    /// Encryption key (hex or base64)
    #[arg(long, value_parser = parse_enc_key)]
    enc_key: Option<KeyMaterial>,

    /// Integrity algorithm name or IKEv2 transform id
    #[arg(long)]
    int_alg: Option<IntegrityAlgorithm>,

    /// Integrity key (hex or base64)
    #[arg(long, value_parser = parse_int_key)]
    int_key: Option<KeyMaterial>,

    /// Anti-replay window size
    #[arg(long, default_value = "0")]
    replay_window: u32,

    /// TFC padding length
    #[arg(long, default_value = "0")]
    tfc: u32,

    /// UDP encapsulation (true, false, unset)
    #[arg(long, default_value = "unset")]
    encap: TriState,

    /// Extended sequence numbers (true, false, unset)
    #[arg(long, default_value = "unset")]
    esn: TriState,

    /// Copy DF bit (true, false, unset)
    #[arg(long, default_value = "unset")]
    copy_df: TriState,

    /// Copy ECN bits (true, false, unset)
    #[arg(long, default_value = "unset")]
    copy_ecn: TriState,

    /// Copy DSCP bits (true, false, unset)
    #[arg(long, default_value = "unset")]
    copy_dscp: TriState,

    /// Local side initiated the exchange (true, false, unset)
    #[arg(long, default_value = "unset")]
    initiator: TriState,

    /// Inbound SA (true, false, unset)
    #[arg(long, default_value = "unset")]
    inbound: TriState,

    /// Update an existing SA instead of adding (true, false, unset)
    #[arg(long, default_value = "unset")]
    update: TriState,
}

impl AddSaArgs {
    fn descriptor(&self) -> SaDescriptor {
        SaDescriptor {
            source: self.src.clone(),
            destination: self.dst.clone(),
            spi: self.spi,
            protocol: self.proto,
            interface_id: self.if_id,
            request_id: self.reqid,
            mode: self.mode,
            bound_interface: self.interface.clone(),
            encryption_algorithm: self.enc_alg,
            encryption_key: self.enc_key.clone().unwrap_or_default(),
            integrity_algorithm: self.int_alg,
            integrity_key: self.int_key.clone().unwrap_or_default(),
            replay_window: self.replay_window,
            tfc_padding: self.tfc,
            encapsulate: self.encap,
            extended_sequence_numbers: self.esn,
            copy_df: self.copy_df,
            copy_ecn: self.copy_ecn,
            copy_dscp: self.copy_dscp,
            initiator: self.initiator,
            inbound: self.inbound,
            update: self.update,
        }
    }
}

#[derive(clap::Args, Debug)]
struct DelSaArgs {
    /// Source address
    #[arg(long, default_value = "")]
    src: String,

    /// Destination address
    #[arg(long, default_value = "")]
    dst: String,

    /// Security Parameter Index (decimal or 0x-hex)
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    spi: u32,

    /// Protocol: esp, ah, ipcomp, or numeric code
    #[arg(long)]
    proto: Option<IpsecProtocol>,

    /// XFRM interface id
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    if_id: u32,
}

impl DelSaArgs {
    fn key(&self) -> SaDeletionKey {
        SaDeletionKey {
            source: self.src.clone(),
            destination: self.dst.clone(),
            spi: self.spi,
            protocol: self.proto,
            interface_id: self.if_id,
        }
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number `{}`: {}", s, e))
}

fn parse_enc_key(s: &str) -> Result<KeyMaterial, ValidationError> {
    KeyMaterial::parse("enc_key", s)
}

fn parse_int_key(s: &str) -> Result<KeyMaterial, ValidationError> {
    KeyMaterial::parse("int_key", s)
}

/// One remote call.
enum Operation {
    Add(SaDescriptor),
    Del(SaDeletionKey),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let op = match args.command {
        Commands::GenConfig { output } => return cmd_gen_config(output),
        Commands::ValidateConfig => return cmd_validate(args.global.config.as_deref()),
        Commands::AddSa(add) => Operation::Add(add.descriptor()),
        Commands::DelSa(del) => Operation::Del(del.key()),
    };

    let settings = match resolve_settings(&args.global) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&settings, &op).await {
        Ok(ack) => {
            println!("{}", ack);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.outcome_unknown() {
                eprintln!("SA state unknown, query the remote before retrying");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Merge the optional config file with command-line flags.
fn resolve_settings(args: &GlobalArgs) -> Result<CliConfig, ConfigError> {
    let mut settings = match &args.config {
        Some(path) => CliConfig::from_file(path)?,
        None => CliConfig::default(),
    };

    if let Some(addr) = &args.addr {
        settings.address = addr.clone();
    }
    if let Some(tls) = &args.tls {
        settings.tls = Some(tls.clone());
    }
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }
    if let Some(level) = &args.log_level {
        settings.log_level = level.clone();
    }

    settings.validate()?;
    Ok(settings)
}

/// Connect, perform one call, and close.
async fn run(settings: &CliConfig, op: &Operation) -> Result<Acknowledgment, SaError> {
    let tls = settings.tls.as_deref().unwrap_or_default();
    let connector = Connector::new(settings.connect_options());
    let client = SaClient::new(connector.connect(&settings.address, tls).await?);

    let result = match op {
        Operation::Add(sa) => client.add_sa(sa, settings.deadline()).await,
        Operation::Del(key) => client.del_sa(key, settings.deadline()).await,
    };
    if let Err(e) = client.close().await {
        debug!("Close failed: {}", e);
    }
    result
}

/// Process exit status for each error kind.
fn exit_code(err: &SaError) -> u8 {
    match err {
        SaError::Validation(_) => EXIT_USAGE,
        SaError::Credential(_) => EXIT_CREDENTIAL,
        SaError::Connection { .. } => EXIT_CONNECTION,
        SaError::Transport(_) => EXIT_TRANSPORT,
        SaError::RemoteRejected { .. } => EXIT_REJECTED,
        SaError::DeadlineExceeded(_) => EXIT_DEADLINE,
    }
}

fn cmd_gen_config(output: PathBuf) -> ExitCode {
    let toml_str = match CliConfig::example().to_toml() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to generate configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let content = format!(
        r#"# ipsecctl configuration
# Generated by ipsecctl gen-config
# Command-line flags override these values.

{}
"#,
        toml_str
    );

    if let Err(e) = std::fs::write(&output, content) {
        eprintln!("Failed to write {}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }
    println!("Generated configuration file: {}", output.display());
    ExitCode::SUCCESS
}

fn cmd_validate(config_path: Option<&Path>) -> ExitCode {
    let Some(config_path) = config_path else {
        eprintln!("validate-config needs a file: ipsecctl --config <file> validate-config");
        return ExitCode::from(EXIT_USAGE);
    };

    match CliConfig::from_file(config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Address:  {}", config.address);
            println!("TLS:      {}", config.tls.as_deref().unwrap_or("(not set)"));
            println!("Timeout:  {}s", config.timeout_secs);
            println!("Connect:  {}s", config.connect_timeout_secs);
            if let Some(name) = &config.server_name {
                println!("Server:   {}", name);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use dpu_ipsec::RemoteStatus;
    use std::time::Duration;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ipsecctl").chain(argv.iter().copied()))
            .expect("parse args")
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_add_sa_arguments() {
        let args = parse(&[
            "--addr",
            "10.0.0.1:50151",
            "--tls",
            "/certs",
            "add-sa",
            "--src",
            "192.168.1.1",
            "--dst",
            "192.168.1.2",
            "--spi",
            "0x100",
            "--proto",
            "esp",
            "--mode",
            "tunnel",
            "--enc-alg",
            "aes-gcm16",
            "--enc-key",
            "0x00112233",
            "--int-alg",
            "0",
            "--esn",
            "true",
            "--copy-df",
            "false",
            "--reqid",
            "5",
        ]);
        assert_eq!(args.global.addr.as_deref(), Some("10.0.0.1:50151"));

        let Commands::AddSa(add) = args.command else {
            panic!("expected add-sa");
        };
        let sa = add.descriptor();
        assert_eq!(sa.spi, 256);
        assert_eq!(sa.protocol, Some(IpsecProtocol::Esp));
        assert_eq!(sa.mode, Some(IpsecMode::Tunnel));
        assert_eq!(sa.encryption_algorithm, Some(EncryptionAlgorithm::AesGcm16));
        assert_eq!(sa.encryption_key.as_bytes(), &[0x00, 0x11, 0x22, 0x33]);
        assert_eq!(sa.integrity_algorithm, Some(IntegrityAlgorithm::None));
        assert!(sa.integrity_key.is_empty());
        assert_eq!(sa.extended_sequence_numbers, TriState::Enabled);
        assert_eq!(sa.copy_df, TriState::Disabled);
        assert_eq!(sa.copy_ecn, TriState::Unset);
        assert_eq!(sa.request_id, 5);
        assert!(sa.validate().is_ok());
    }

    #[test]
    fn test_numeric_codes_accepted() {
        let args = parse(&[
            "add-sa", "--dst", "10.0.0.2", "--spi", "7", "--proto", "51", "--mode", "1",
        ]);
        let Commands::AddSa(add) = args.command else {
            panic!("expected add-sa");
        };
        let sa = add.descriptor();
        assert_eq!(sa.protocol, Some(IpsecProtocol::Ah));
        assert_eq!(sa.mode, Some(IpsecMode::Transport));
    }

    #[test]
    fn test_bad_values_rejected_by_parser() {
        let argv = ["ipsecctl", "add-sa", "--dst", "10.0.0.2", "--proto", "gre"];
        assert!(Args::try_parse_from(argv).is_err());

        let argv = ["ipsecctl", "add-sa", "--esn", "maybe"];
        assert!(Args::try_parse_from(argv).is_err());

        let argv = ["ipsecctl", "add-sa", "--enc-key", "not a key!"];
        assert!(Args::try_parse_from(argv).is_err());

        let argv = ["ipsecctl", "del-sa", "--spi", "0xZZ"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_missing_required_fields_fail_validation() {
        let args = parse(&["del-sa", "--dst", "10.0.0.2", "--proto", "esp"]);
        let Commands::DelSa(del) = args.command else {
            panic!("expected del-sa");
        };
        let err: SaError = del.key().validate().unwrap_err().into();
        assert_eq!(exit_code(&err), EXIT_USAGE);
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipsecctl.toml");
        std::fs::write(
            &path,
            "address = \"10.0.0.1:50151\"\ntimeout_secs = 30\ntls = \"/a\"\n",
        )
        .unwrap();

        let args = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--timeout",
            "3",
            "del-sa",
        ]);
        let settings = resolve_settings(&args.global).unwrap();
        assert_eq!(settings.address, "10.0.0.1:50151");
        assert_eq!(settings.tls.as_deref(), Some("/a"));
        assert_eq!(settings.deadline(), Duration::from_secs(3));

        let args = parse(&["--timeout", "0", "del-sa"]);
        assert!(resolve_settings(&args.global).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let cases = [
            (SaError::from(ValidationError::ZeroDeadline), 2),
            (SaError::Credential("bad".into()), 3),
            (SaError::connection("a:1", "refused"), 4),
            (SaError::transport("reset"), 5),
            (
                SaError::RemoteRejected {
                    status: RemoteStatus::NotFound,
                    message: String::new(),
                },
                6,
            ),
            (SaError::DeadlineExceeded(Duration::from_secs(1)), 7),
        ];
        for (err, code) in cases {
            assert_eq!(exit_code(&err), code, "{err}");
        }
    }

    #[test]
    fn test_gen_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.toml");
        assert_eq!(cmd_gen_config(path.clone()), ExitCode::SUCCESS);

        let loaded = CliConfig::from_file(&path).unwrap();
        assert_eq!(loaded, CliConfig::example());
        assert_eq!(cmd_validate(Some(&path)), ExitCode::SUCCESS);
        assert_eq!(cmd_validate(None), ExitCode::from(EXIT_USAGE));
    }
}
