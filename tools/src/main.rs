//! ledger-check: command-line runner for the donation ledger self-check.
//!
//! Usage:
//!   ledger-check --db ledger.db                  run the self-check, exit 1 on failure
//!   ledger-check --db ledger.db --audit          report every violation as JSON lines
//!   ledger-check --db ledger.db --generate 42    fill a fresh database first
//!   ledger-check --db ledger.db --ipc-mode       serve JSON-line requests on stdin
//!
//! Without `--db` the runner works on a throwaway database.

use anyhow::{Context, Result};
use ledger_core::{
    config::PlatformConfig,
    db::{CursorOptions, Db},
    error::LedgerError,
    generator::LedgerGenerator,
    tip::post_tip_json,
};
use std::env;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    SelfCheck,
    Tip {
        tipper: i64,
        tippee: String,
        amount: String,
    },
    Quit,
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db_path = arg_value(&args, "--db");
    let config = match arg_value(&args, "--config") {
        Some(path) => PlatformConfig::load(path)?,
        None => PlatformConfig::default(),
    };
    let audit = args.iter().any(|a| a == "--audit");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let generate = seed_arg(&args)?;

    let db = match db_path {
        Some(path) => Db::open(path, &config.db)?,
        None => Db::temporary_with(&config.db)?,
    };
    let label = db_path.unwrap_or("temporary database");
    db.migrate()?;

    if let Some(seed) = generate {
        let ledger = db.with_cursor(CursorOptions::default(), |conn| {
            LedgerGenerator::new(seed).populate(conn)
        })?;
        if !ipc_mode {
            println!(
                "generated seed {seed}: {} participants, {} paydays, {} exchanges",
                ledger.participants.len(),
                ledger.paydays,
                ledger.exchanges
            );
        }
    }

    if ipc_mode {
        run_ipc_loop(&db, &config)?;
        return Ok(ExitCode::SUCCESS);
    }

    if audit {
        let violations = db.audit()?;
        for v in &violations {
            println!("{}", serde_json::to_string(v)?);
        }
        return Ok(if violations.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    match db.self_check() {
        Ok(()) => {
            println!("self-check passed: {label}");
            Ok(ExitCode::SUCCESS)
        }
        Err(LedgerError::InvariantViolation(v)) => {
            eprintln!("self-check FAILED [{}]: {v}", v.check_name());
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

/// One JSON request per stdin line, one JSON reply per stdout line.
fn run_ipc_loop(db: &Db, config: &PlatformConfig) -> Result<()> {
    let mut out = io::stdout().lock();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<IpcCommand>(&line) {
            Ok(cmd) => match handle_command(db, config, cmd)? {
                Some(reply) => reply,
                None => break,
            },
            Err(e) => json!({ "error": e.to_string() }),
        };
        serde_json::to_writer(&mut out, &reply)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    Ok(())
}

/// `None` ends the session.
fn handle_command(db: &Db, config: &PlatformConfig, cmd: IpcCommand) -> Result<Option<Value>> {
    Ok(Some(match cmd {
        IpcCommand::SelfCheck => {
            let violations = db.audit()?;
            json!({ "ok": violations.is_empty(), "violations": violations })
        }
        IpcCommand::Tip {
            tipper,
            tippee,
            amount,
        } => {
            let response = post_tip_json(db, &config.tips, tipper, &tippee, &amount);
            json!({ "code": response.code, "body": response.body })
        }
        IpcCommand::Quit => return Ok(None),
    }))
}

/// `--generate SEED`; a seed that is present but not a u64 is an error.
fn seed_arg(args: &[String]) -> Result<Option<u64>> {
    arg_value(args, "--generate")
        .map(|s| {
            s.parse::<u64>()
                .with_context(|| format!("--generate expects a u64 seed, got '{s}'"))
        })
        .transpose()
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
