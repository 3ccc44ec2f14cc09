use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use note_link_suggest::persist::SqliteKvStore;
use note_link_suggest::suggest::{Editor, TextBuffer};
use note_link_suggest::types::{Candidate, TriggerInfo};
use note_link_suggest::{init_logging, start_session, VaultConfig};

/// Suggest note links while typing.
///
/// Each stdin line is treated as the current editor line with the cursor at
/// its end. `:N` picks suggestion N and prints the rewritten line.
#[derive(Debug, Parser)]
#[command(name = "note-link-suggest", version)]
struct Args {
    /// Vault directory to index.
    vault: PathBuf,

    /// SQLite file holding settings and usage stats.
    /// Defaults to `.note-link-suggest.sqlite` inside the vault.
    #[arg(long)]
    state: Option<PathBuf>,

    /// Extension of note files.
    #[arg(long, default_value = "md")]
    extension: String,

    /// Seconds between vault rescans.
    #[arg(long, default_value_t = 2)]
    poll_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let state_path = args
        .state
        .clone()
        .unwrap_or_else(|| args.vault.join(".note-link-suggest.sqlite"));
    let store = SqliteKvStore::open(&state_path)
        .with_context(|| format!("opening state store {}", state_path.display()))?;

    let config = VaultConfig {
        root: args.vault.clone(),
        extension: args.extension.clone(),
        poll_interval: Duration::from_secs(args.poll_secs.max(1)),
    };
    let session = start_session(config, Arc::new(store))
        .await
        .with_context(|| format!("starting session for {}", args.vault.display()))?;
    let suggester = session.suggester.clone();

    let mut pending: Option<(TextBuffer, TriggerInfo, Vec<Candidate>)> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(input) = lines.next_line().await? {
        if let Some(choice) = input.strip_prefix(':') {
            let Some((mut buffer, trigger, candidates)) = pending.take() else {
                println!("nothing to select");
                continue;
            };
            let picked = choice
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| candidates.get(n.checked_sub(1)?));
            match picked {
                Some(candidate) => {
                    suggester.on_select(&mut buffer, &trigger, candidate).await;
                    println!("{}", buffer.line_text(0).unwrap_or_default());
                }
                None => println!("no such suggestion"),
            }
            continue;
        }

        let buffer = TextBuffer::new(&input);
        let column = input.chars().count();
        let Some(trigger) = suggester.on_trigger(&buffer, 0, column).await else {
            println!("(no trigger)");
            continue;
        };

        let candidates = suggester.get_suggestions(&trigger.query).await;
        if candidates.is_empty() {
            println!("(no matches for {:?})", trigger.query);
            continue;
        }
        for (i, candidate) in candidates.iter().enumerate() {
            println!("{:>2}. {}", i + 1, suggester.render(candidate).await);
        }
        pending = Some((buffer, trigger, candidates));
    }

    drop(suggester);
    session.shutdown().await;
    Ok(())
}
