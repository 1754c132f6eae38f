use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::info;

use tokenkey::{
    adapters::{CryptokiToken, Pkcs11UriService, SoftKey, SoftToken, TokenProfile},
    api::{HashAlgorithm, InfoKind, KeyOptions},
    ports::{LocatorService, RetryUpTo, TokenDevice},
    TokenKey,
};

#[derive(Parser, Debug)]
#[command(name = "tokenkey")]
#[command(about = "Sign and decrypt with keys held on a PKCS#11-style token", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(flatten)]
    pub token: TokenArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Token the commands run against
///
/// With `--module` the key is looked up through a PKCS#11 provider library
/// and `--url` names it. Otherwise a software token is built from `--key`.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// PKCS#11 provider library to load instead of the software token
    #[arg(long, global = true)]
    pub module: Option<std::path::PathBuf>,

    /// User PIN for the PKCS#11 token
    #[arg(long, global = true)]
    pub pin: Option<String>,

    /// PKCS#8 PEM file with the RSA private key to place on the software token
    #[arg(long, global = true, default_value = "key.pem")]
    pub key: std::path::PathBuf,

    /// Label of the software token
    #[arg(long, global = true, default_value = "softtoken")]
    pub token_label: String,

    /// Label of the key object
    #[arg(long, global = true, default_value = "key")]
    pub label: String,

    /// Object id in hex
    #[arg(long, global = true, default_value = "01")]
    pub id: String,

    /// PKCS#11 URI of the key; built from the token and object if omitted
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Retries allowed when the token disappears mid-operation
    #[arg(long, global = true, default_value_t = 0)]
    pub retries: u32,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign data provided via stdin
    Sign {
        /// Digest algorithm for RSA signatures (DSA always uses SHA-1)
        #[arg(long, default_value = "sha256")]
        hash: HashArg,

        /// Print the signature as hex instead of raw bytes
        #[arg(long = "hex")]
        as_hex: bool,
    },

    /// Decrypt PKCS#1 v1.5 ciphertext provided via stdin
    Decrypt,

    /// Print the key's algorithm, label, id and token details
    Info,

    /// Print the key's PKCS#11 URI
    Export,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HashArg {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl From<HashArg> for HashAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Md5 => HashAlgorithm::Md5,
            HashArg::Sha1 => HashAlgorithm::Sha1,
            HashArg::Sha224 => HashAlgorithm::Sha224,
            HashArg::Sha256 => HashAlgorithm::Sha256,
            HashArg::Sha384 => HashAlgorithm::Sha384,
            HashArg::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

fn load_token(args: &TokenArgs) -> anyhow::Result<(Arc<SoftToken>, String)> {
    let pem = std::fs::read_to_string(&args.key)
        .with_context(|| format!("failed to read key file {}", args.key.display()))?;
    let id = hex::decode(&args.id).map_err(|e| anyhow::anyhow!("Invalid object id hex: {}", e))?;

    let token = SoftToken::new();
    token.add_token(TokenProfile::new(args.token_label.as_str(), "0001"))?;
    token.add_key(
        &args.token_label,
        SoftKey::from_pkcs8_pem(args.label.as_str(), id.clone(), &pem)?,
    )?;

    let url = match &args.url {
        Some(url) => url.clone(),
        None => Pkcs11UriService.format(&token.locator(&args.token_label, &id)?)?,
    };
    info!("Using key {}", url);

    Ok((Arc::new(token), url))
}

fn open<D: TokenDevice + ?Sized>(
    token: Arc<D>,
    url: &str,
    retries: u32,
) -> anyhow::Result<TokenKey<D>> {
    let key = tokenkey::open_key_with_notifier(
        token,
        url,
        Arc::new(RetryUpTo(retries)),
        KeyOptions::default(),
    )
    .context("failed to open key")?;
    Ok(key)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(io::stderr)
        .init();

    let args = &cli.token;
    match &args.module {
        Some(module) => {
            let url = args
                .url
                .as_deref()
                .context("--url is required with --module")?;
            let token = CryptokiToken::open(module, args.pin.as_deref())
                .with_context(|| format!("failed to load PKCS#11 module {}", module.display()))?;
            run(open(Arc::new(token), url, args.retries)?, cli.command)
        }
        None => {
            let (token, url) = load_token(args)?;
            run(open(token, &url, args.retries)?, cli.command)
        }
    }
}

fn run<D: TokenDevice + ?Sized>(mut key: TokenKey<D>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Sign { hash, as_hex } => {
            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data)?;

            let signature = key
                .sign_data(&data, hash.into())
                .context("failed to sign data")?;

            if as_hex {
                println!("{}", hex::encode(&signature));
            } else {
                io::stdout().write_all(&signature)?;
            }
        }
        Commands::Decrypt => {
            let mut ciphertext = Vec::new();
            io::stdin().read_to_end(&mut ciphertext)?;

            let plaintext = key
                .decrypt(&ciphertext)
                .context("failed to decrypt data")?;
            io::stdout().write_all(&plaintext)?;
        }
        Commands::Info => {
            let algorithm = key
                .algorithm()
                .map(|a| a.to_string())
                .unwrap_or_default();
            println!("algorithm: {}", algorithm);

            let fields = [
                ("label", InfoKind::Label),
                ("id", InfoKind::IdHex),
                ("token", InfoKind::TokenLabel),
                ("serial", InfoKind::TokenSerial),
                ("manufacturer", InfoKind::TokenManufacturer),
                ("model", InfoKind::TokenModel),
            ];
            for (name, kind) in fields {
                if let Some(value) = key.info(kind) {
                    println!("{}: {}", name, value);
                }
            }
        }
        Commands::Export => {
            println!("{}", key.export_url()?);
        }
    }

    Ok(())
}
