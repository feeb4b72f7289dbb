pub mod commands;
pub mod config;
pub mod events;
pub mod logging;
pub mod models;
pub mod saver;
pub mod state;
pub mod storage;

pub use config::ConfigStore;
pub use models::Task;
pub use storage::{AppPaths, FileTaskStore, StoreError, TaskStore};

#[cfg(all(feature = "app", not(test)))]
const SHUTDOWN_FLUSH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[cfg(all(feature = "app", not(test)))]
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use crate::commands::{
        parse_command, record_privacy_answer, render_board, Reply, Session, PRIVACY_NOTICE,
    };

    let paths = AppPaths::from_home();
    if let Err(err) = logging::init_logging(paths.root()) {
        eprintln!("file logging disabled: {err}");
    }

    let store = Arc::new(FileTaskStore::new(paths.tasks_file()));
    let config = Arc::new(ConfigStore::new(paths.config_file()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if !config.privacy_accepted() {
        println!("{PRIVACY_NOTICE}\n\nAccept? [y/N]");
        let answer = lines.next_line().await?.unwrap_or_default();
        let answer_config = Arc::clone(&config);
        let accepted =
            tokio::task::spawn_blocking(move || record_privacy_answer(&answer_config, &answer))
                .await??;
        if !accepted {
            log::info!("privacy notice declined");
            println!("Privacy notice declined, exiting.");
            return Ok(());
        }
        log::info!("privacy notice accepted");
    }

    let (mut session, mut reports) = Session::open(store, config).await?;
    println!("{}", render_board(session.board()));
    println!("(type help for commands)");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match session.execute(command).await {
                    Ok(Reply::Text(text)) => println!("{text}"),
                    Ok(Reply::Quit) => break,
                    Err(err) => println!("error: {err}"),
                }
            }
            Some(report) = reports.recv() => {
                if report.is_failure() {
                    println!("warning: {report}");
                }
            }
        }
    }

    if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, session.close())
        .await
        .is_err()
    {
        log::warn!("pending saves did not finish within {SHUTDOWN_FLUSH_TIMEOUT:?}");
        eprintln!("warning: some changes may not have been saved");
    }
    while let Ok(report) = reports.try_recv() {
        if report.is_failure() {
            eprintln!("warning: {report}");
        }
    }
    Ok(())
}
