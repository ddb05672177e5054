//! The dedicated server main() implementation

use std::path::PathBuf;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ConfigHandle;
use crate::prelude::*;
use crate::{ZoneOptions, ZoneServer};

#[derive(Parser)]
#[command(name = "sw_zone_server", about = "Subwar dedicated zone server")]
struct CliOptions {
    /// Directory holding the zone database.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Public arenas to create at startup.
    #[arg(long, default_value = "0")]
    arenas: Vec<String>,
}

/// Starts the dedicated server CLI; the return value is the process exit
/// code.
pub fn run_dedicated_server() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = CliOptions::parse();

    let server = match ZoneServer::new(ZoneOptions {
        data_dir: cli.data_dir,
        ..Default::default()
    }) {
        Ok(server) => server,
        Err(error) => {
            error!("could not start the zone server: {error:#}");
            return 1;
        }
    };

    for name in &cli.arenas {
        server.create_arena(name, ConfigHandle::default());
    }

    spawn_console(Arc::clone(&server));
    server.run()
}

/// Reads operator commands on a side thread; the mainloop owns the calling
/// thread.
fn spawn_console(server: Arc<ZoneServer>) {
    std::thread::Builder::new()
        .name("SW Console".to_owned())
        .spawn(move || {
            let Ok(mut editor) = DefaultEditor::new() else {
                return;
            };
            loop {
                match editor.readline("subwar> ") {
                    Ok(line) => {
                        let command = line.split_whitespace().next().unwrap_or("");
                        match command {
                            "" => continue,
                            "quit" | "stop" | "exit" => {
                                info!("shutting down on operator request");
                                server.quit(0);
                                break;
                            }
                            "sync" => {
                                if server.persist().sync_now(None).is_ok() {
                                    info!("full sync queued");
                                }
                            }
                            _ => {
                                error!("unknown command {command}");
                            }
                        }
                    }
                    Err(ReadlineError::Eof) => {
                        info!("stdin EOF reached");
                        break;
                    }
                    Err(ReadlineError::Interrupted) => {
                        info!("interrupt signal received");
                        server.quit(0);
                        break;
                    }
                    Err(ReadlineError::WindowResized) => continue,
                    Err(error) => {
                        error!("error reading commandline prompt: {error}");
                        break;
                    }
                }
            }
        })
        .expect("Could not create the console thread");
}
