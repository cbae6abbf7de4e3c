use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use homebudget_lib::{
    account::{repair_account, BootstrapOutcome, RepairOutcome},
    config::Config,
    init_logging,
    migrate::{apply_migrations, status as migration_status},
    model::{Identity, ACCOUNT_PROFILE_NOT_FOUND},
    model_income::{IncomeEntryInput, IncomeSourceInput},
    repo_income::{income_entry_add, income_source_create, income_source_delete, income_sources_list},
    state::AppState,
    store::AccountStore,
};

/// Exit code when a command ran but the account or income operation failed.
const EXIT_FAILED: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "homebudget", about = "Household budgeting accounts and income", version)]
struct Cli {
    /// Database path; overrides HOMEBUDGET_DB.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema maintenance.
    #[command(subcommand)]
    Db(DbCommand),
    /// Account bootstrap and repair.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Income sources and entries.
    #[command(subcommand)]
    Income(IncomeCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending migrations.
    Migrate,
    /// List migrations and whether each one is applied.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct IdentityArgs {
    /// Identity id issued by the auth provider.
    #[arg(long)]
    id: String,
    #[arg(long)]
    email: Option<String>,
}

impl IdentityArgs {
    fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.email.as_deref())
    }
}

#[derive(Debug, Subcommand)]
enum AccountCommand {
    /// Make sure the identity has a household and a profile.
    Bootstrap {
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the profile for an identity.
    Show {
        #[arg(long)]
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Attach a missing profile, reusing an orphaned household when possible.
    Repair {
        #[command(flatten)]
        identity: IdentityArgs,
        #[arg(long)]
        json: bool,
    },
    /// List households no profile points at.
    Orphans {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum IncomeCommand {
    /// Register an income source for a household member.
    AddSource {
        #[arg(long)]
        household: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "salary")]
        kind: String,
        /// Record a one-off source with no payment frequency.
        #[arg(long)]
        one_off: bool,
        #[arg(long, default_value = "monthly")]
        frequency: String,
        #[arg(long)]
        amount_cents: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Show a household's sources with recent entries and this month's totals.
    List {
        #[arg(long)]
        household: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete a source and all of its entries.
    DeleteSource {
        #[arg(long)]
        id: String,
    },
    /// Record money received from a source.
    AddEntry {
        #[arg(long)]
        source: String,
        #[arg(long)]
        amount_cents: i64,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config.with_db_path(cli.db.clone()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let guard = match init_logging(&config.log_filter, config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };
    tracing::debug!(target: "homebudget", db = %config.db_path.display(), "cli booted");

    let code = match handle_cli(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };

    drop(guard);
    process::exit(code);
}

async fn handle_cli(command: Commands, config: Config) -> Result<i32> {
    let state = AppState::open(config)
        .await
        .context("open database")?;
    let code = match command {
        Commands::Db(cmd) => handle_db(&state, cmd).await,
        Commands::Account(cmd) => handle_account(&state, cmd).await,
        Commands::Income(cmd) => handle_income(&state, cmd).await,
    };
    state.pool.close().await;
    code
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{serialized}");
    Ok(())
}

async fn handle_db(state: &AppState, command: DbCommand) -> Result<i32> {
    match command {
        DbCommand::Migrate => {
            // AppState::open already applied them; this reports the result.
            apply_migrations(&state.pool).await?;
            println!("Migrations up to date.");
            Ok(0)
        }
        DbCommand::Status { json } => {
            let rows = migration_status(&state.pool).await?;
            if json {
                let payload: Vec<_> = rows
                    .iter()
                    .map(|row| serde_json::json!({ "version": row.version, "applied": row.applied }))
                    .collect();
                print_json(&payload)?;
            } else {
                for row in rows {
                    let mark = if row.applied { "applied" } else { "pending" };
                    println!("{mark:<8} {}", row.version);
                }
            }
            Ok(0)
        }
    }
}

async fn handle_account(state: &AppState, command: AccountCommand) -> Result<i32> {
    match command {
        AccountCommand::Bootstrap { identity, json } => {
            let outcome = state
                .orchestrator
                .ensure_account_bootstrapped(&identity.identity())
                .await;
            if json {
                print_json(&outcome)?;
            } else {
                print_bootstrap(&outcome);
            }
            Ok(if outcome.failure().is_some() { EXIT_FAILED } else { 0 })
        }
        AccountCommand::Show { id, json } => {
            let profile = state.store.find_profile(&id).await?;
            match profile {
                Some(profile) if json => print_json(&profile)?,
                Some(profile) => {
                    println!("{} ({}) role={}", profile.full_name, profile.id, profile.role);
                    let household = match profile.household_id.as_deref() {
                        Some(household_id) => state.store.get_household(household_id).await?,
                        None => None,
                    };
                    match household {
                        Some(household) => {
                            let members = state.store.profiles_in_household(&household.id).await?;
                            println!(
                                "household: {} ({}) members={}",
                                household.name,
                                household.id,
                                members.len()
                            );
                        }
                        None => println!("household: -"),
                    }
                }
                None => {
                    eprintln!("Error: No profile for {id}. ({ACCOUNT_PROFILE_NOT_FOUND})");
                    return Ok(EXIT_FAILED);
                }
            }
            Ok(0)
        }
        AccountCommand::Repair { identity, json } => {
            let outcome = repair_account(&state.orchestrator, &identity.identity()).await?;
            if json {
                print_json(&outcome)?;
            } else {
                match &outcome {
                    RepairOutcome::AlreadyHealthy(profile) => {
                        println!("Profile {} already present; nothing to repair.", profile.id)
                    }
                    RepairOutcome::Reattached { profile, household } => println!(
                        "Attached profile {} to existing household {} ({}).",
                        profile.id, household.id, household.name
                    ),
                    RepairOutcome::Bootstrapped(bootstrap) => print_bootstrap(bootstrap),
                }
            }
            let failed = matches!(
                &outcome,
                RepairOutcome::Bootstrapped(BootstrapOutcome::Failed(_))
            );
            Ok(if failed { EXIT_FAILED } else { 0 })
        }
        AccountCommand::Orphans { json } => {
            let orphans = state.store.orphaned_households().await?;
            if json {
                print_json(&orphans)?;
            } else if orphans.is_empty() {
                println!("No orphaned households.");
            } else {
                for orphan in &orphans {
                    let household = &orphan.household;
                    println!(
                        "{}  {:<30} created_by={}",
                        household.id,
                        household.name,
                        household.created_by.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(0)
        }
    }
}

fn print_bootstrap(outcome: &BootstrapOutcome) {
    match outcome {
        BootstrapOutcome::AlreadyExists(profile) => println!(
            "Profile {} already exists (household {}).",
            profile.id,
            profile.household_id.as_deref().unwrap_or("-")
        ),
        BootstrapOutcome::Created { profile, household } => println!(
            "Created household {} ({}) and profile {}.",
            household.id, household.name, profile.id
        ),
        BootstrapOutcome::Failed(failure) => {
            eprintln!("{}", failure.user_message());
            eprintln!("  stage: {}  code: {}", failure.stage, failure.error.code());
            if let Some(orphan) = &failure.orphaned_household_id {
                eprintln!("  orphaned household: {orphan}");
            }
        }
    }
}

async fn handle_income(state: &AppState, command: IncomeCommand) -> Result<i32> {
    let result = match command {
        IncomeCommand::AddSource {
            household,
            user,
            name,
            kind,
            one_off,
            frequency,
            amount_cents,
            json,
        } => {
            let input = IncomeSourceInput {
                household_id: household,
                user_id: user,
                name,
                kind,
                is_recurring: !one_off,
                frequency: Some(frequency),
                amount_cents,
            };
            income_source_create(&state.pool, input).await.map(|source| {
                if json {
                    print_json(&source)
                } else {
                    println!("{}", source.id);
                    Ok(())
                }
            })
        }
        IncomeCommand::List { household, json } => {
            income_sources_list(&state.pool, &household).await.map(|overview| {
                if json {
                    return print_json(&overview);
                }
                for summary in &overview.sources {
                    let source = &summary.source;
                    println!(
                        "{}  {:<24} {:<10} {:<10} this month: {}",
                        source.id,
                        source.name,
                        source.kind,
                        source.frequency.as_deref().unwrap_or("one-off"),
                        format_cents(summary.monthly_total_cents)
                    );
                    for entry in &summary.recent_entries {
                        println!("    {}  {}", entry.date, format_cents(entry.amount_cents));
                    }
                }
                println!(
                    "Monthly total: {}  Yearly projected: {}",
                    format_cents(overview.monthly_total_cents),
                    format_cents(overview.yearly_projected_cents)
                );
                Ok(())
            })
        }
        IncomeCommand::DeleteSource { id } => income_source_delete(&state.pool, &id)
            .await
            .map(|()| {
                println!("Deleted income source {id}.");
                Ok(())
            }),
        IncomeCommand::AddEntry {
            source,
            amount_cents,
            date,
            description,
        } => {
            let input = IncomeEntryInput {
                income_source_id: source,
                amount_cents,
                date,
                description,
            };
            income_entry_add(&state.pool, input).await.map(|entry| {
                println!("{}", entry.id);
                Ok(())
            })
        }
    };

    match result {
        Ok(printed) => {
            printed?;
            Ok(0)
        }
        Err(err) => {
            eprintln!("Error: {} ({})", err.message(), err.code());
            Ok(EXIT_FAILED)
        }
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
