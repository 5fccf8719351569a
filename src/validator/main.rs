//! Standalone checker for the bot's environment configuration.
//!
//! Loads the same variables the bot reads at startup and prints the
//! resulting roster, storage backend and transport without contacting
//! Telegram or Supabase.

use std::process::ExitCode;

use clap::Parser;

use ledger_bot::config::{Role, RunMode, Settings};

/// Ledger bot configuration checker.
#[derive(Parser, Debug)]
#[command(name = "check_roster")]
#[command(about = "Validates the ledger bot's roster and settings")]
#[command(version)]
struct Args {
    /// Path to the .env file to load before checking.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// List every roster member.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match dotenvy::from_filename(&args.env_file) {
        Ok(_) => println!("Loaded: {}", args.env_file),
        Err(e) => println!("No env file loaded ({}): {e}", args.env_file),
    }

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("✗ Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    check_settings(&settings, args.verbose)
}

fn check_settings(settings: &Settings, verbose: bool) -> ExitCode {
    let mut warnings = 0;

    let count = |role: Role| settings.roster.iter().filter(|(_, r)| *r == role).count();
    println!(
        "Roster: {} members ({} hr, {} it), admin @{}",
        settings.roster.len(),
        count(Role::Hr),
        count(Role::It),
        settings.roster.admin()
    );
    if verbose {
        for (name, role) in settings.roster.iter() {
            println!("  @{name}: {role}");
        }
    }
    if settings.roster.len() == 1 {
        warnings += 1;
        println!("  ⚠ ALLOWED_USERS is empty; only the admin can use the bot");
    }

    match (&settings.supabase, &settings.ledger_state_path) {
        (Some(supabase), _) => println!(
            "Storage: Supabase at {} (bucket '{}')",
            supabase.url, supabase.bucket
        ),
        (None, Some(path)) => println!("Storage: memory, snapshot at {}", path.display()),
        (None, None) => {
            warnings += 1;
            println!("Storage: memory only");
            println!("  ⚠ Balances are lost on restart; set SUPABASE_URL/SUPABASE_KEY");
        }
    }

    println!("Transport: {} (listen {})", settings.mode, settings.listen_addr());
    if settings.mode == RunMode::Webhook {
        if settings.webhook_url.is_none() {
            warnings += 1;
            println!("  ⚠ WEBHOOK_URL not set; the webhook must be registered externally");
        }
        if settings.webhook_secret.is_none() {
            warnings += 1;
            println!("  ⚠ WEBHOOK_SECRET not set; webhook requests are not authenticated");
        }
    }

    println!();
    if warnings == 0 {
        println!("✓ Configuration is valid");
    } else {
        println!("✓ Configuration is valid ({warnings} warnings)");
    }
    ExitCode::SUCCESS
}
