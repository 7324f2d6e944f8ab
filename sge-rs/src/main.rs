use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::sync::broadcast;
use tracing::{info, warn};

use sge::auth::{AuthClient, GameFilter};
use sge::cli::{self, CliArgs, Command, ConfigFile};
use sge::config::Config;
use sge::editor::{CompileStatus, ScriptEditEngine};
use sge::session::{GameSession, SessionEvent, SessionOptions};
use sge::transport::DelimitMode;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("sge: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("sge: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_max_level(if debug { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("sge: logging unavailable: {e}");
    }
}

fn load_config(source: &ConfigFile) -> anyhow::Result<Config> {
    let path = match source {
        ConfigFile::Explicit(p) => Some(p.clone()),
        ConfigFile::Search => cli::find_user_config(),
    };
    let Some(path) = path else {
        info!("no config file found; using defaults");
        return Ok(Config::new());
    };
    let (config, errors) =
        Config::load_file(&path).with_context(|| format!("reading {}", path.display()))?;
    for e in errors {
        warn!(file = %path.display(), "{e}");
    }
    Ok(config)
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let settings = &config.settings;

    let Some(profile_name) = args.profile else {
        for p in config.profiles.iter() {
            println!("{}", p.to_addprofile());
        }
        return Ok(());
    };
    let profile = config
        .profiles
        .find(&profile_name)
        .ok_or_else(|| anyhow!("no profile named {profile_name:?}"))?;

    let password = std::env::var(settings.password_env())
        .with_context(|| format!("password not found in ${}", settings.password_env()))?;
    let client = AuthClient::new(
        settings.auth_host(),
        settings.auth_port(),
        settings.connector().map_err(|e| anyhow!(e))?,
    );

    // ── Login ────────────────────────────────────────────────────────────────
    let filter = match args.command {
        Command::Games => None,
        _ => Some(GameFilter::new(&format!("(?i)^{}$", regex::escape(&profile.game)))?),
    };
    let choice = client.login(&profile.account, &password, filter.as_ref()).await?;

    if args.command == Command::Games {
        for g in choice.games() {
            println!("{:<8} {:<36} {}", g.code, g.name, g.access.as_deref().unwrap_or("-"));
        }
        choice.close().await;
        return Ok(());
    }

    let characters = choice.select_game(&profile.game).await?;
    let (sal, details) = characters.select_character(&profile.character, Some(profile.mode)).await?;
    info!(character = %details.label, mode = %details.mode, "logged in");

    // ── Game session ──────────────────────────────────────────────────────────
    let front_end = match profile.front_end {
        Some(fe) => fe,
        None => settings.front_end().map_err(|e| anyhow!(e))?,
    };
    let session = Arc::new(GameSession::new(SessionOptions {
        front_end,
        game_mode: DelimitMode::Unbuffered,
        log_path: settings.logfile(),
    }));
    if settings.logfile().is_some() {
        session.toggle_logging(None).await.context("opening session log")?;
    }

    let timeout = args.timeout.map_or_else(|| settings.timeout(), Duration::from_secs);
    let mut events = session.subscribe();
    session.connect(&sal);
    wait_for_hello(&mut events, timeout).await?;

    let engine = ScriptEditEngine::with_timeout(Arc::clone(&session), timeout);
    let outcome = tokio::select! {
        r = run_command(&engine, args.command) => r,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };
    session.quit();
    outcome
}

async fn wait_for_hello(
    events: &mut broadcast::Receiver<SessionEvent>,
    timeout: Duration,
) -> anyhow::Result<()> {
    loop {
        let event = tokio::time::timeout(timeout, events.recv())
            .await
            .map_err(|_| anyhow!("game server did not answer within {timeout:?}"))?;
        match event {
            Ok(SessionEvent::Hello) => return Ok(()),
            Ok(SessionEvent::Error(e)) => bail!("game session: {e}"),
            Ok(SessionEvent::Quit) | Err(broadcast::error::RecvError::Closed) => {
                bail!("game server closed the connection")
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
}

async fn run_command(engine: &ScriptEditEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Profiles | Command::Games => Ok(()),
        Command::Check(n) => {
            let p = engine.check_script(n).await?;
            println!("script   #{n}");
            println!("name     {}", p.name);
            println!("desc     {}", p.desc);
            println!("owner    {}", p.owner);
            println!("modifier {}", p.modifier);
            println!("path     {}", p.path);
            println!("lines    {}", p.lines);
            if let Some(ts) = p.last_modified {
                println!("modified {ts}");
            }
            Ok(())
        }
        Command::Date(n) => {
            let p = engine.check_script(n).await?;
            match p.last_modified {
                Some(ts) => println!("{}", ts.format("%Y-%m-%d %H:%M:%S")),
                None => bail!("script #{n} reported no modification time"),
            }
            Ok(())
        }
        Command::Get { target, file } => {
            let (props, text) = engine.download_script(target.clone()).await?;
            let mut text = text.replace("\r\n", "\n");
            text.push('\n');
            match file {
                Some(path) => {
                    tokio::fs::write(&path, text)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(script = %target, name = %props.name, path = %path.display(), "script saved");
                }
                None => print!("{text}"),
            }
            Ok(())
        }
        Command::Put { target, file } => {
            let source = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let lines: Vec<String> = source.lines().map(str::to_owned).collect();
            let result = engine.upload_script(target.clone(), lines).await?;
            for d in &result.error_list {
                println!("{}:{}: {}", file.display(), d.line, d.message);
            }
            match result.status {
                CompileStatus::Compiled => {
                    println!(
                        "{target}: compiled, {} warnings, {} bytes",
                        result.warnings, result.bytes
                    );
                    Ok(())
                }
                CompileStatus::Failed => bail!(
                    "{target}: compile failed with {} errors and {} warnings",
                    result.errors,
                    result.warnings
                ),
                other => bail!("{target}: upload ended while {other:?}"),
            }
        }
    }
}
