//! Inspect and edit the saved notification store.
//!
//!   lendnotify list --unread --type borrow_update
//!   lendnotify search projector
//!   lendnotify mark-read msg_1709281800000

use anyhow::{Result, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use lendnotify_core::{Message, NotificationType, Priority, parse_timestamp};
use lendnotify_daemon::FileConfig;
use lendnotify_daemon::config::DEFAULT_STATE_FILE;
use lendnotify_store::{MessageFilter, NotificationStore};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lendnotify", version, about = "Equipment-lending notification store")]
struct Args {
    /// Store file; defaults to [store].state_file from --config, then
    /// ./lendnotify-state.json.
    #[arg(long, global = true, env = "LENDNOTIFY_STATE_FILE")]
    state_file: Option<PathBuf>,

    #[arg(long, global = true, env = "LENDNOTIFY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored messages, most recent first.
    List {
        #[arg(long = "type")]
        kind: Option<NotificationType>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long, conflicts_with = "read")]
        unread: bool,
        #[arg(long)]
        read: bool,
        /// Epoch millis or a date-time such as "2024-03-01 08:30:00".
        #[arg(long, value_parser = parse_time)]
        since: Option<i64>,
        #[arg(long, value_parser = parse_time)]
        until: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Case-insensitive search over titles and content.
    Search { text: String },
    /// Counts by type and priority.
    Stats {
        #[arg(long)]
        json: bool,
    },
    MarkRead { id: String },
    MarkAllRead,
    Remove { id: String },
    /// Remove every message.
    Clear,
    /// Remove read messages only.
    ClearRead,
    /// Override the unread total with a server-reported count.
    SetUnread {
        #[arg(allow_negative_numbers = true)]
        count: i64,
    },
    /// Store a diagnostic message.
    Test {
        #[arg(long = "type", default_value = "notification")]
        kind: NotificationType,
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lendnotify=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let state_file = match (args.state_file, &args.config) {
        (Some(path), _) => path,
        (None, Some(config)) => FileConfig::load(config)?
            .store
            .state_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
        (None, None) => PathBuf::from(DEFAULT_STATE_FILE),
    };
    let mut store = NotificationStore::load_from(&state_file)?;

    let changed = match args.command {
        Command::List {
            kind,
            priority,
            unread,
            read,
            since,
            until,
            limit,
            json,
        } => {
            let filter = MessageFilter {
                kind,
                priority,
                read: if unread {
                    Some(false)
                } else if read {
                    Some(true)
                } else {
                    None
                },
                since,
                until,
            };
            let mut found = store.filter(&filter);
            if let Some(limit) = limit {
                found.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else {
                print_messages(&found);
            }
            false
        }
        Command::Search { text } => {
            print_messages(&store.search(&text));
            false
        }
        Command::Stats { json } => {
            let stats = store.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("total:  {}", stats.total);
                println!("unread: {} (badge {})", stats.unread, store.unread_total());
                for (kind, count) in &stats.by_type {
                    println!("  {:<20} {count}", kind.as_str());
                }
                for (priority, count) in &stats.by_priority {
                    println!("  {:<20} {count}", priority.as_str());
                }
            }
            false
        }
        Command::MarkRead { id } => {
            if store.get(&id).is_none() {
                bail!("no message with id {id}");
            }
            store.mark_as_read(&id);
            true
        }
        Command::MarkAllRead => {
            store.mark_all_as_read();
            true
        }
        Command::Remove { id } => {
            if store.remove(&id).is_none() {
                bail!("no message with id {id}");
            }
            true
        }
        Command::Clear => {
            store.clear_all();
            true
        }
        Command::ClearRead => {
            let removed = store.clear_read();
            println!("removed {removed} read messages");
            true
        }
        Command::SetUnread { count } => {
            store.set_unread_total(count);
            true
        }
        Command::Test { kind, priority } => {
            let id = store.test_message(kind, priority);
            println!("{id}");
            true
        }
    };

    if changed {
        store.save_to(&state_file)?;
    }
    Ok(())
}

fn parse_time(text: &str) -> Result<i64, String> {
    if let Ok(millis) = text.parse::<i64>() {
        return Ok(millis);
    }
    match parse_timestamp(&Value::String(text.to_string()), i64::MIN) {
        i64::MIN => Err(format!("not a timestamp: {text}")),
        millis => Ok(millis),
    }
}

fn print_messages(messages: &[&Message]) {
    for m in messages {
        let when = DateTime::from_timestamp_millis(m.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| m.timestamp.to_string());
        let marker = if m.read { ' ' } else { '*' };
        println!(
            "{marker} {when}  {:<18} {:<7} {}  [{}]",
            m.kind.as_str(),
            m.priority.as_str(),
            m.title,
            m.id
        );
        if !m.content.is_empty() {
            println!("    {}", m.content);
        }
    }
}
