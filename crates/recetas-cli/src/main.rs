use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use recetas_chat::{ChatConfig, ChatSyncEngine, LocalBackend, SessionIdentity};
use recetas_db::Database;
use recetas_realtime::Hub;
use recetas_types::{Identity, Message};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the feed
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recetas=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let config = ChatConfig::from_env()?;
    let db_path = std::env::var("RECETAS_DB_PATH").unwrap_or_else(|_| "recetas.db".into());
    let email =
        std::env::var("RECETAS_USER_EMAIL").unwrap_or_else(|_| "invitado@recetas.app".into());
    let role = std::env::var("RECETAS_USER_ROLE").unwrap_or_else(|_| "user".into());

    // Init database and the signed-in user
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let user_id = match db.get_user_by_email(&email)? {
        Some(user) => user.id,
        None => uuid::Uuid::new_v4().to_string(),
    };
    db.upsert_user(&user_id, &email, &role)?;
    info!(user = %user_id, email = %email, "Signed in");

    let hub = Hub::new();
    let backend = LocalBackend::new(db, hub.clone(), config.message_table.clone());
    let identity = Arc::new(SessionIdentity::signed_in(Identity {
        user_id: user_id.clone(),
        email,
    }));
    let engine = ChatSyncEngine::new(config, Arc::new(backend), Arc::new(hub), identity);

    let session = engine.start(&user_id).await;
    tokio::spawn(print_feed(engine.clone(), user_id.clone()));
    tokio::spawn(print_typing(engine.clone()));

    println!("Commands: /delete <id>, /reload, /typing, /quit. Anything else is sent.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if !run_command(&engine, line.trim()).await {
            break;
        }
    }

    session.stop();
    info!("Bye");
    Ok(())
}

/// Returns false when the user asked to quit.
async fn run_command(engine: &ChatSyncEngine, line: &str) -> bool {
    match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return false,
        ("/reload", _) => {
            if let Err(e) = engine.reload().await {
                println!("! reload failed: {}", e);
            }
        }
        ("/typing", _) => {
            if !engine.notify_typing() {
                println!("! typing announcement throttled");
            }
        }
        ("/delete", id) if !id.trim().is_empty() => {
            if let Err(e) = engine.delete(id.trim()).await {
                println!("! {}", e);
            }
        }
        _ => {
            engine.notify_typing();
            if let Err(e) = engine.send(line).await {
                println!("! {}", e);
            }
        }
    }
    true
}

/// Print each message the first time it shows up in the feed.
async fn print_feed(engine: ChatSyncEngine, user_id: String) {
    let mut messages = engine.messages();
    let mut printed = HashSet::new();
    loop {
        let snapshot = messages.borrow_and_update().clone();
        for message in snapshot.iter().filter(|m| printed.insert(m.id.clone())) {
            println!("{}", render(message, &user_id));
        }
        if messages.changed().await.is_err() {
            warn!("Message feed closed");
            break;
        }
    }
}

async fn print_typing(engine: ChatSyncEngine) {
    let mut typing = engine.typing();
    let mut last = None;
    while typing.changed().await.is_ok() {
        let label = engine.typing_label();
        if label != last {
            if let Some(label) = &label {
                println!("... {}", label);
            }
            last = label;
        }
    }
}

fn render(message: &Message, user_id: &str) -> String {
    let who = if message.is_authored_by(user_id) {
        "you".to_string()
    } else {
        message.author.email.clone()
    };
    format!(
        "[{}] {} ({}): {}  #{}",
        message.created_at.format("%H:%M"),
        who,
        message.author.role,
        message.content,
        message.id
    )
}
