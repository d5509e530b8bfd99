//! `lendkit`: enroll identities and drive the book-lending contract from the shell.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use lendkit_cli::{actions, server, Services};
use lendkit_core::config::{ConnectionProfile, Settings};
use lendkit_core::logger::init_logging;
use lendkit_core::{defaults, LendKitResult, Outcome};

#[derive(Parser, Debug)]
#[command(name = "lendkit", version, about, long_about = None)]
struct Cli {
    /// Connection profile describing the certificate authority and the ledger gateway
    #[arg(long, global = true, env = "LENDKIT_PROFILE", default_value = "connection-org1.json")]
    profile: PathBuf,

    /// Wallet directory (defaults to ./wallet, or the platform data dir when absent)
    #[arg(long, global = true, env = "LENDKIT_WALLET")]
    wallet: Option<PathBuf>,

    /// Channel the book contract is deployed on
    #[arg(long, global = true, env = "LENDKIT_CHANNEL", default_value = defaults::CHANNEL)]
    channel: String,

    /// Name of the book contract
    #[arg(long, global = true, env = "LENDKIT_CONTRACT", default_value = defaults::CONTRACT)]
    contract: String,

    /// Connection-profile key of the certificate authority
    #[arg(long, global = true, env = "LENDKIT_CA", default_value = defaults::CERTIFICATE_AUTHORITY)]
    ca: String,

    /// Log filter, e.g. `debug` or `lendkit_core=trace` (RUST_LOG wins when set)
    #[arg(long, global = true, env = "LENDKIT_LOG")]
    log: Option<String>,

    /// Allow plain-HTTP authority and gateway endpoints
    #[arg(long, global = true, env = "LENDKIT_ALLOW_HTTP")]
    allow_http: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP interface
    Serve {
        /// Address to listen on
        #[arg(long, env = "LENDKIT_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },
    /// Enroll the administrator with its bootstrap secret
    EnrollAdmin {
        #[arg(long, default_value = defaults::ADMIN_ID)]
        id: String,
        /// Bootstrap enrollment secret
        #[arg(long, env = "LENDKIT_ADMIN_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Register and enroll a user on behalf of the stored administrator
    RegisterUser {
        #[arg(long)]
        id: String,
        /// client, user, peer, orderer or admin
        #[arg(long, default_value = "client")]
        role: String,
    },
    /// List identities in the wallet
    Identities,
    /// Book operations
    #[command(subcommand)]
    Book(BookCommand),
}

#[derive(Subcommand, Debug)]
enum BookCommand {
    /// Register a new book, acting as its owner
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// Ask to rent a book, acting as the renter
    Request {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        renter: String,
    },
    /// Hand a requested book over, acting as its owner
    Rent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// Take a rented book back, acting as its owner
    Return {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// Show a book's current state
    Query {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// List every book on the ledger
    List {
        /// Identity to query as
        #[arg(long)]
        id: String,
    },
    /// Show every committed version of a book
    History {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            wallet_dir: self.wallet_dir(),
            channel: self.channel.clone(),
            contract: self.contract.clone(),
            certificate_authority: self.ca.clone(),
            require_https: !self.allow_http,
            ..Settings::default()
        }
    }

    fn wallet_dir(&self) -> PathBuf {
        if let Some(dir) = &self.wallet {
            return dir.clone();
        }
        let local = PathBuf::from(defaults::WALLET_DIR);
        if local.is_dir() {
            return local;
        }
        dirs::data_dir().map_or(local, |dir| dir.join("lendkit").join(defaults::WALLET_DIR))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the command; `Ok(false)` means the operation ran and failed.
async fn run(cli: Cli) -> eyre::Result<bool> {
    let settings = cli.settings();
    let profile = ConnectionProfile::load(&cli.profile)
        .wrap_err_with(|| format!("loading connection profile {}", cli.profile.display()))?;
    let services =
        Services::from_profile(&profile, &settings).wrap_err("initialising lendkit services")?;

    let result = match cli.command {
        Command::Serve { bind } => {
            server::serve(services, bind).await?;
            return Ok(true);
        }
        Command::EnrollAdmin { id, secret } => {
            actions::enroll_admin(&services, &id, secret).await
        }
        Command::RegisterUser { id, role } => {
            actions::register_user(&services, &id, &role).await
        }
        Command::Identities => actions::identities(&services),
        Command::Book(command) => run_book(&services, command).await,
    };
    print_outcome(&result)
}

async fn run_book(services: &Services, command: BookCommand) -> LendKitResult<Outcome> {
    match command {
        BookCommand::Register { name, owner } => {
            actions::register_book(services, &name, &owner).await
        }
        BookCommand::Request {
            name,
            owner,
            renter,
        } => actions::request_rent(services, &name, &owner, &renter).await,
        BookCommand::Rent { name, owner } => actions::rent_book(services, &name, &owner).await,
        BookCommand::Return { name, owner } => actions::return_book(services, &name, &owner).await,
        BookCommand::Query { name, owner } => actions::query_book(services, &name, &owner).await,
        BookCommand::List { id } => actions::list_books(services, &id).await,
        BookCommand::History { name, owner } => {
            actions::book_history(services, &name, &owner).await
        }
    }
}

fn print_outcome(result: &LendKitResult<Outcome>) -> eyre::Result<bool> {
    if let Err(e) = result {
        tracing::debug!(error = %e, "operation failed");
    }
    let outcome = actions::render(result);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.is_success())
}
