//!
//! meterbill CLI binary
//! --------------------
//! Command-line client for the meter billing API. Restores any saved session on startup,
//! then runs one command (`-c`) or an interactive prompt.

use std::env;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use meterbill::cli::{Command, Shell};
use meterbill::cli::shell::HELP;
use meterbill::config::ClientConfig;
use meterbill::identity::{AuthSessionManager, FileSessionStore, SessionStore};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--api <url>] [--session-dir <dir>]                 # interactive prompt\n  {program} [--api <url>] [--session-dir <dir>] -c \"<command>\"   # run one command and exit\n\nFlags:\n  --api <url>              Billing API base URL (env METERBILL_API_URL, default http://localhost:8000)\n  --session-dir <dir>      Where the session is kept between runs (env METERBILL_SESSION_DIR, default .meterbill)\n  -c, --command <cmd>      Run a single command\n  -h, --help               Show this help\n\n{HELP}\n\nExamples:\n  {program} -c \"login ria@example.org hunter22\"\n  {program} -c \"invoices --paid false\"\n  {program} --api https://billing.example.org"
    );
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut api: Option<String> = None;
    let mut session_dir: Option<String> = None;
    let mut command: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--api" => {
                if i + 1 >= args.len() { eprintln!("--api requires a URL"); print_usage(&program); std::process::exit(2); }
                api = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--session-dir" => {
                if i + 1 >= args.len() { eprintln!("--session-dir requires a value"); print_usage(&program); std::process::exit(2); }
                session_dir = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "--command" | "-c" => {
                if i + 1 >= args.len() { eprintln!("--command requires a value"); print_usage(&program); std::process::exit(2); }
                command = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            unk => {
                eprintln!("Unrecognized argument: {}", unk);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let mut config = ClientConfig::from_env().context("invalid environment configuration")?;
    if let Some(url) = api.as_deref() {
        config = config.with_api_base(url).with_context(|| format!("invalid --api url '{}'", url))?;
    }
    if let Some(dir) = session_dir {
        config = config.with_session_dir(dir);
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(config.session_dir.clone()));
    let manager = rt
        .block_on(AuthSessionManager::start(&config, store))
        .context("failed to start session")?;
    let mut shell = Shell::new(manager);

    if let Some(line) = command {
        let ok = run_line(&rt, &mut shell, &line);
        if !ok { std::process::exit(1); }
        return Ok(());
    }

    run_repl(rt, shell)
}

/// Parse and run one line; false when it failed.
fn run_line(rt: &tokio::runtime::Runtime, shell: &mut Shell, line: &str) -> bool {
    let cmd = match Command::parse(line) {
        Ok(c) => c,
        Err(e) => { eprintln!("error: {}", e.message()); return false; }
    };
    match rt.block_on(shell.execute(cmd)) {
        Ok(reply) => {
            if let Some(text) = reply.render() { println!("{}", text); }
            true
        }
        Err(e) => {
            eprintln!("error: {}", e);
            if e.is_authorization() { eprintln!("session ended; sign in again"); }
            false
        }
    }
}

fn run_repl(rt: tokio::runtime::Runtime, mut shell: Shell) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();
    println!("meterbill {} ({}). Type 'help' for commands.", shell.manager().view().state().label(), shell.manager().gateway().base());
    loop {
        input.clear();
        print!("{}", shell.prompt()); let _ = stdout.flush();
        match stdin.read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = input.trim();
        if line.is_empty() { continue; }
        if matches!(Command::parse(line), Ok(Command::Quit)) { break; }
        run_line(&rt, &mut shell, line);
    }
    Ok(())
}
