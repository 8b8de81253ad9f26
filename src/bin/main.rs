//! Interactive analyst session on the terminal.
//!
//! Each line is a chat turn; answers stream to stdout as they are generated.

use crypto_analyst::{
    agent::build_default_driver, config::Settings, models::Language, session::AnalystSession,
    validators::validate_language,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const HELP: &str = "commands: /tools, /reset, /lang <zh|en>, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let session = AnalystSession::new(Arc::new(build_default_driver(&settings)?));
    let mut language = Language::default();

    info!(max_invocations = settings.max_invocations, "Analyst session ready");
    println!("{} {} ({})", settings.app_name, settings.app_version, HELP);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').map_or((line, ""), |(cmd, arg)| (cmd, arg.trim())) {
            ("", _) => continue,
            ("/quit" | "/exit", _) => break,
            ("/help", _) => println!("{}", HELP),
            ("/reset", _) => {
                session.reset_session().await;
                println!("history cleared");
            }
            ("/tools", _) => {
                for info in session.list_capabilities() {
                    println!("  {:<24} {}", info.name, info.description);
                }
            }
            ("/lang", arg) => match validate_language(arg) {
                Ok(lang) => {
                    language = lang;
                    println!("language: {}", language);
                }
                Err(e) => eprintln!("{}", e),
            },
            _ => match session.chat_stream(line, language) {
                Ok(fragments) => {
                    tokio::pin!(fragments);
                    while let Some(fragment) = fragments.next().await {
                        stdout.write_all(fragment.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    stdout.write_all(b"\n").await?;
                }
                Err(e) => eprintln!("{}", e),
            },
        }
    }

    Ok(())
}
