use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use secure_banking::config::{self, Settings};
use secure_banking::models::Account;
use secure_banking::security::behavioral_biometrics::pattern_for;
use secure_banking::security::RiskEngine;
use secure_banking::services::LogFilter;
use secure_banking::statements::{demo_rows, sort_rows, to_csv, SortKey};
use secure_banking::storage::{JsonFileStore, MemoryStore};
use secure_banking::utils::logging;
use secure_banking::{DemoBackend, SecurityContext};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log the demo user in against in-memory collaborators
    LoginDemo {
        /// Type the email with an unfamiliar rhythm to force the OTP step
        #[arg(long)]
        anomaly: bool,
    },

    /// Run the risk engine drift and print each tick
    Monitor {
        #[arg(long, default_value_t = 10)]
        ticks: u32,
    },

    /// Print the demo statement as CSV
    ExportStatement {
        #[arg(long, value_enum, default_value_t = SortArg::Date)]
        sort: SortArg,

        #[arg(long)]
        ascending: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SortArg {
    Date,
    Description,
    Amount,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Date => SortKey::Date,
            SortArg::Description => SortKey::Description,
            SortArg::Amount => SortKey::Amount,
        }
    }
}

const DEMO_EMAIL: &str = "a@bank.com";
const DEMO_PASSWORD: &str = "Passw0rd!";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = config::load_config(cli.config.as_deref())?;
    if env::var("LOG_LEVEL").is_err() {
        env::set_var("LOG_LEVEL", &settings.log_level);
    }

    // Initialize logging
    logging::init_logger();

    match cli.command {
        Command::LoginDemo { anomaly } => login_demo(&settings, anomaly).await,
        Command::Monitor { ticks } => monitor(&settings, ticks).await,
        Command::ExportStatement { sort, ascending } => {
            let mut rows = demo_rows();
            sort_rows(&mut rows, sort.into(), ascending);
            println!("{}", to_csv(&rows));
            Ok(())
        }
    }
}

async fn login_demo(settings: &Settings, anomaly: bool) -> Result<()> {
    let backend = DemoBackend::new(vec![Account::new("Asha", "asha", DEMO_EMAIL, DEMO_PASSWORD)]);
    backend.typing.seed(DEMO_EMAIL, vec![pattern_for(DEMO_EMAIL, 80, 120); 3]);

    let durable = JsonFileStore::open(&settings.durable_store_path)
        .with_context(|| format!("Failed to open {}", settings.durable_store_path.display()))?;

    let context = SecurityContext::new(
        settings,
        backend.collaborators(),
        Arc::new(MemoryStore::new()),
        Arc::new(durable),
        Arc::new(RiskEngine::new(settings)),
    );
    context.start(false).await?;

    let rhythm = if anomaly {
        pattern_for(DEMO_EMAIL, 220, 480)
    } else {
        pattern_for(DEMO_EMAIL, 80, 120)
    };

    let step = context.login().submit_email(DEMO_EMAIL, &rhythm).await?;
    info!("Email accepted, next step: {:?}", step);

    let established = if anomaly {
        context.login().request_otp().await?;
        let code = backend
            .otp
            .outbox(DEMO_EMAIL)
            .context("No one-time code was issued")?;
        context.login().submit_password_with_otp(DEMO_PASSWORD, &code).await?
    } else {
        context.login().submit_password(DEMO_PASSWORD).await?
    };

    println!("redirect: {}", established.redirect);
    println!("currentUser: {}", serde_json::to_string_pretty(&established.user)?);

    let visit = context.gate().visit(established.redirect, Some(DEMO_EMAIL)).await?;
    visit.verify().await?;
    println!("gate: {:?}", visit.state());

    let risk = context.risk().get_state();
    println!("risk: {:.1} ({:?})", risk.score, risk.level());

    context.logout()?;

    context.audit().flush().await;
    for event in backend.security_log.query(&LogFilter::default()) {
        let visitor = event.fingerprint.map(|f| f.visitor_id).unwrap_or_default();
        println!("log: {} {} {}", event.timestamp.to_rfc3339(), event.action, visitor);
    }
    Ok(())
}

async fn monitor(settings: &Settings, ticks: u32) -> Result<()> {
    let engine = Arc::new(RiskEngine::new(settings));
    let (tx, mut changes) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = engine.subscribe(move |state| {
        let _ = tx.send(state.clone());
    });
    let _drift = engine.start();

    let deadline = settings.risk_tick() * (ticks + 1) + Duration::from_secs(1);
    let mut seen = 0;
    while seen < ticks {
        let state = tokio::time::timeout(deadline, changes.recv())
            .await
            .context("Risk engine stopped ticking")?
            .context("Risk engine dropped")?;
        seen += 1;

        let active: Vec<&str> = state.signals.active().iter().map(|s| s.as_str()).collect();
        println!(
            "tick {:>3}  score {:>5.1}  level {:?}  signals [{}]",
            seen,
            state.score,
            state.level(),
            active.join(", ")
        );
    }

    Ok(())
}
