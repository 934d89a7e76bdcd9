//! `raceeng` - CLI for race-engineer
//!
//! This binary loads F1 sessions, prints lap and strategy analysis, and runs
//! the race engineer chat over a local LLM.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use race_engineer::agent::{Agent, ChatSession, KnowledgeSource};
use race_engineer::analysis::{self, LapRow};
use race_engineer::cli::{
    CacheCommand, Cli, Command, ConfigCommand, DeltaCommand, KbCommand, LapsCommand,
    OutputFormat, PitCommand, SessionArgs, StintsCommand, UndercutCommand,
};
use race_engineer::kb::KnowledgeBase;
use race_engineer::llm::{ChatModel, Embedder, OllamaClient, Role};
use race_engineer::report::{self, Table};
use race_engineer::telemetry::{
    normalize_driver, FileSource, OpenF1Source, Session, SessionLoader, SessionSource,
};
use race_engineer::{init_logging, Config, Error, SessionId, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Config commands load (or inspect) the configuration themselves
    if let Command::Config(cmd) = cli.command {
        return handle_config(cli.config, cmd);
    }

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Load(args) => handle_load(&config, &args).await,
        Command::Laps(cmd) => handle_laps(&config, &cmd).await,
        Command::Stints(cmd) => handle_stints(&config, &cmd).await,
        Command::Delta(cmd) => handle_delta(&config, &cmd).await,
        Command::Pit(cmd) => handle_pit(&config, &cmd).await,
        Command::Undercut(cmd) => handle_undercut(&config, &cmd).await,
        Command::Ask(cmd) => handle_ask(&config, &cmd.session, &cmd.question).await,
        Command::Chat(cmd) => handle_chat(&config, &cmd.session).await,
        Command::Kb(cmd) => handle_kb(&config, cmd).await,
        Command::Cache(cmd) => handle_cache(&config, cmd),
        Command::Config(_) => Ok(()),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("opening cache at {}", path.display()))
}

/// Load the selected session. File imports bypass the cache.
async fn load_session(config: &Config, args: &SessionArgs) -> anyhow::Result<Session> {
    let id = args.id();
    if let Some(path) = &args.from_file {
        let source = FileSource::new(path);
        return Ok(source.fetch(&id).await?);
    }

    let storage = open_storage(config)?;
    let source = OpenF1Source::from_config(config)?;
    let session = SessionLoader::new(&source, &storage)
        .refresh(args.refresh)
        .load(&id)
        .await?;
    Ok(session)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn tail<T>(mut rows: Vec<T>, n: usize) -> Vec<T> {
    rows.split_off(rows.len().saturating_sub(n))
}

async fn handle_load(config: &Config, args: &SessionArgs) -> anyhow::Result<()> {
    let session = load_session(config, args).await?;
    let drivers = session.drivers();

    println!("{}", session.describe());
    println!("  Laps:      {}", session.laps.len());
    println!("  Drivers:   {}", drivers.join(", "));
    match &session.weather {
        Some(w) => {
            println!(
                "  Air temp:  {} °C",
                report::fmt_opt(w.air_temp_avg_c, 1)
            );
            println!(
                "  Track:     {} °C",
                report::fmt_opt(w.track_temp_avg_c, 1)
            );
            println!("  Humidity:  {} %", report::fmt_opt(w.humidity_avg, 0));
            println!("  Rainfall:  {}", if w.rainfall { "yes" } else { "no" });
        }
        None => println!("  Weather:   n/a"),
    }
    Ok(())
}

async fn handle_laps(config: &Config, cmd: &LapsCommand) -> anyhow::Result<()> {
    let session = load_session(config, &cmd.session).await?;
    let driver = normalize_driver(&cmd.driver);
    let rows = analysis::lap_summary(&session, &driver);
    if rows.is_empty() {
        println!("No laps for {driver}");
        return Ok(());
    }
    let (best, avg) = (analysis::best_lap(&rows), analysis::mean_lap(&rows));
    let rows = tail(rows, cmd.tail);

    match cmd.format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => println!("{}", report::lap_table(&rows)),
        OutputFormat::Plain => {
            println!(
                "Driver {driver}: best={}s avg={}s",
                report::fmt_opt(best, 3),
                report::fmt_opt(avg, 3)
            );
            for row in &rows {
                println!("{}", plain_lap(row));
            }
        }
    }
    Ok(())
}

fn plain_lap(row: &LapRow) -> String {
    let compound = row
        .compound
        .map_or_else(|| "?".to_string(), |c| c.to_string());
    format!("Lap {}: {:.3}s {compound}", row.lap_number, row.lap_time_s)
}

async fn handle_stints(config: &Config, cmd: &StintsCommand) -> anyhow::Result<()> {
    let session = load_session(config, &cmd.session).await?;
    let driver = normalize_driver(&cmd.driver);
    let rows = analysis::stint_summary(&session, &driver);
    if rows.is_empty() {
        println!("No stints for {driver}");
        return Ok(());
    }

    match cmd.format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table | OutputFormat::Plain => println!("{}", report::stint_table(&rows)),
    }
    Ok(())
}

async fn handle_delta(config: &Config, cmd: &DeltaCommand) -> anyhow::Result<()> {
    let (a, b) = (normalize_driver(&cmd.driver_a), normalize_driver(&cmd.driver_b));
    if a == b {
        return Err(Error::invalid_input(format!("cannot compare {a} with itself")).into());
    }
    let session = load_session(config, &cmd.session).await?;
    let rows = analysis::lap_delta(&session, &a, &b);
    let Some(mean) = analysis::mean_delta(&rows) else {
        println!("No aligned laps for {a} vs {b}");
        return Ok(());
    };
    let samples = rows.len();
    let rows = tail(rows, cmd.tail);

    match cmd.format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => {
            println!("{a} - {b}");
            println!("{}", report::delta_table(&rows));
        }
        OutputFormat::Plain => println!("Δ(A-B) mean={mean:.3}s, samples={samples}"),
    }
    Ok(())
}

async fn handle_pit(config: &Config, cmd: &PitCommand) -> anyhow::Result<()> {
    let session = load_session(config, &cmd.session).await?;
    let mut strategy = config.strategy.clone();
    if let Some(pit_loss) = cmd.pit_loss {
        strategy.pit_loss_s = pit_loss;
    }
    let suggestion = analysis::suggest_pit_lap(&session, &cmd.driver, &strategy);

    match cmd.format {
        OutputFormat::Json => print_json(&suggestion)?,
        OutputFormat::Table => {
            let mut table = Table::new(&["Driver", "PitLap", "Reason"]);
            table.push_row(vec![
                suggestion.driver.clone(),
                suggestion
                    .recommend_lap
                    .map_or_else(|| "?".to_string(), |l| l.to_string()),
                suggestion.reason.clone(),
            ]);
            println!("{table}");
        }
        OutputFormat::Plain => println!("{suggestion}"),
    }
    Ok(())
}

async fn handle_undercut(config: &Config, cmd: &UndercutCommand) -> anyhow::Result<()> {
    let session = load_session(config, &cmd.session).await?;
    let mut strategy = config.strategy.clone();
    if let Some(pit_loss) = cmd.pit_loss {
        strategy.pit_loss_s = pit_loss;
    }
    let verdict = analysis::evaluate_undercut(&session, &cmd.attacker, &cmd.defender, &strategy);

    match cmd.format {
        OutputFormat::Json => print_json(&verdict)?,
        OutputFormat::Table => {
            let mut table = Table::new(&["Attacker", "Defender", "Deg_s/lap", "Gain_s", "PitLoss_s", "Viable"]);
            table.push_row(vec![
                verdict.attacker.clone(),
                verdict.defender.clone(),
                report::fmt_opt(verdict.defender_deg_s_per_lap, 3),
                report::fmt_opt(verdict.expected_gain_s, 1),
                format!("{:.1}", verdict.pit_loss_s),
                verdict
                    .viable
                    .map_or_else(|| "?".to_string(), |v| v.to_string()),
            ]);
            println!("{table}");
        }
        OutputFormat::Plain => println!("{verdict}"),
    }
    Ok(())
}

/// Build the chat front end: the agent and knowledge base when the LLM is
/// enabled, direct tool routing otherwise.
async fn build_chat(config: &Config) -> anyhow::Result<ChatSession> {
    if !config.llm.enabled {
        info!("LLM disabled, quick commands only");
        let knowledge = KnowledgeSource::Unavailable(Error::LlmDisabled.to_string());
        return Ok(ChatSession::new(None, config.strategy.clone(), knowledge));
    }

    let client = Arc::new(OllamaClient::from_config(config)?);
    let storage = open_storage(config)?;
    let embedder: Arc<dyn Embedder> = client.clone();
    let chat: Arc<dyn ChatModel> = client.clone();

    let knowledge = match KnowledgeBase::build(&config.kb, &storage, embedder, chat.clone(), false).await {
        Ok(Some(kb)) => KnowledgeSource::Ready(Arc::new(kb)),
        Ok(None) => KnowledgeSource::Empty,
        Err(e) => {
            warn!("Knowledge base unavailable: {}", e);
            KnowledgeSource::Unavailable(e.to_string())
        }
    };
    let agent = Agent::new(chat, config.llm.max_iterations);
    Ok(ChatSession::new(Some(agent), config.strategy.clone(), knowledge))
}

async fn handle_ask(config: &Config, args: &SessionArgs, question: &str) -> anyhow::Result<()> {
    let session = load_session(config, args).await?;
    let mut chat = build_chat(config).await?;
    chat.load(session);
    println!("{}", chat.ask(question).await);
    Ok(())
}

async fn handle_chat(config: &Config, args: &SessionArgs) -> anyhow::Result<()> {
    let session = load_session(config, args).await?;
    let mut chat = build_chat(config).await?;
    println!("Loaded {}. Drivers: {}", session.describe(), session.drivers().join(", "));
    println!("Type a question, /history for the transcript, /quit to exit.");
    chat.load(session);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        match prompt {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                for message in chat.history() {
                    let who = match message.role {
                        Role::User => "you",
                        Role::Assistant => "engineer",
                        Role::System => "system",
                    };
                    println!("[{who}] {}", message.content);
                }
            }
            _ => println!("{}", chat.ask(prompt).await),
        }
    }
    Ok(())
}

async fn handle_kb(config: &Config, cmd: KbCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    match cmd {
        KbCommand::Index { force } => {
            let client = Arc::new(OllamaClient::from_config(config)?);
            match KnowledgeBase::build(&config.kb, &storage, client.clone(), client, force).await? {
                Some(kb) => println!("Indexed {} chunks from {}", kb.chunk_count(), config.kb.dir.display()),
                None => println!("{}", race_engineer::agent::KB_EMPTY),
            }
        }
        KbCommand::Ask { question } => {
            let client = Arc::new(OllamaClient::from_config(config)?);
            match KnowledgeBase::build(&config.kb, &storage, client.clone(), client, false).await? {
                Some(kb) => println!("{}", kb.ask(&question).await?),
                None => println!("{}", race_engineer::agent::KB_EMPTY),
            }
        }
        KbCommand::Status { json } => {
            let status = KnowledgeBase::status(&config.kb, &storage, &config.llm.embedding_model)?;
            if json {
                print_json(&status)?;
            } else {
                println!("Knowledge base: {}", config.kb.dir.display());
                println!("  Documents:      {}", status.documents);
                println!("  Stored chunks:  {}", status.stored_chunks);
                println!(
                    "  Index:          {}",
                    if status.up_to_date { "up to date" } else { "stale" }
                );
            }
        }
        KbCommand::Clear => {
            let removed = storage.clear_kb()?;
            println!("Removed {removed} knowledge base chunks.");
        }
    }
    Ok(())
}

fn handle_cache(config: &Config, cmd: CacheCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    match cmd {
        CacheCommand::List { format } => {
            let sessions = storage.list_sessions()?;
            match format {
                OutputFormat::Json => print_json(&sessions)?,
                OutputFormat::Table => {
                    let mut table = Table::new(&["Year", "GrandPrix", "Session", "Laps", "Fetched"]);
                    for s in &sessions {
                        table.push_row(vec![
                            s.id.year.to_string(),
                            s.event_name.clone(),
                            s.session_name.clone(),
                            s.lap_count.to_string(),
                            s.fetched_at.format("%Y-%m-%d %H:%M").to_string(),
                        ]);
                    }
                    println!("{table}");
                }
                OutputFormat::Plain => {
                    for s in &sessions {
                        println!("{} ({} laps)", s.id, s.lap_count);
                    }
                }
            }
            let stats = storage.stats()?;
            info!(
                sessions = stats.sessions,
                laps = stats.laps,
                kb_chunks = stats.kb_chunks,
                bytes = stats.db_size_bytes,
                "Cache at {}",
                storage.path().display()
            );
        }
        CacheCommand::Remove { year, gp, session } => {
            let id = SessionId::new(year, gp, session);
            if storage.delete_session(&id)? {
                println!("Removed {id}.");
            } else {
                println!("{id} is not cached.");
            }
        }
        CacheCommand::Clear => {
            let removed = storage.clear_sessions()?;
            println!("Removed {removed} cached sessions.");
        }
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                print_json(&config)?;
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[OpenF1]");
                println!("  Base URL:           {}", config.openf1.base_url);
                println!("  Timeout (s):        {}", config.http.timeout_secs);
                println!("  Max retries:        {}", config.http.max_retries);
                println!();
                println!("[LLM]");
                println!("  Enabled:            {}", config.llm.enabled);
                println!("  Base URL:           {}", config.llm.base_url);
                println!("  Model:              {}", config.llm.model);
                println!("  Embedding model:    {}", config.llm.embedding_model);
                println!("  Max iterations:     {}", config.llm.max_iterations);
                println!();
                println!("[Knowledge base]");
                println!("  Directory:          {}", config.kb.dir.display());
                println!("  Glob:               {}", config.kb.glob);
                println!(
                    "  Chunks:             {} chars, {} overlap",
                    config.kb.chunk_size, config.kb.chunk_overlap
                );
                println!();
                println!("[Strategy]");
                println!("  Pit loss (s):       {}", config.strategy.pit_loss_s);
                println!(
                    "  Degradation (s):    {}",
                    config.strategy.degradation_threshold_s
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            Config::load_from(Some(path.clone()))
                .with_context(|| format!("configuration error in {}", path.display()))?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}
