//! Watch Party - watch-together coordination
//!
//! `watchparty serve` runs the coordination server. `watchparty watch`
//! connects to it from the terminal: rooms, chat and episode following.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watchparty_core::EpisodePointer;
use watchparty_net::Server;

mod catalog;
mod config;
mod console;
mod navigation;
mod network;
mod session;

use catalog::{EpisodeProvider, StaticCatalog};
use config::{AppConfig, ClientConfig, ServerConfig};
use console::{Command, TerminalNavigator};
use navigation::{Location, NavigationRequest, NavigationSync, Navigator};
use network::{ConnectionManager, ConnectionHandle, NetworkEvent};
use session::SessionClient;

type AppResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "watchparty", version, about = "Watch anime episodes together")]
struct Cli {
    /// Config file (default: watchparty.toml in the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination server
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Connect from the terminal
    Watch {
        /// Server as host:port
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        nickname: Option<String>,
        /// Room to join once connected
        #[arg(long)]
        room: Option<String>,
        /// Starting location, e.g. /watch/<animeId>?ep=<episodeId>
        #[arg(long, default_value = "/")]
        location: String,
        /// Episode catalog TOML
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they stay out of the chat on stdout
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Serve { bind } => serve(config.server, bind).await,
        Commands::Watch {
            server,
            nickname,
            room,
            location,
            catalog,
        } => {
            let mut client = config.client;
            if let Some(server) = server {
                client.server = server;
            }
            if nickname.is_some() {
                client.nickname = nickname;
            }
            if catalog.is_some() {
                client.catalog = catalog;
            }
            watch(client, room, location).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting with error");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: ServerConfig, bind: Option<SocketAddr>) -> AppResult {
    let bind = bind.unwrap_or(config.bind);
    let server = Server::start(bind, config.limits).await?;
    tracing::info!(addr = %server.addr(), "Watch party server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!(rooms = server.room_count().await, "Shutting down");
    server.shutdown();
    Ok(())
}

/// Terminal client state
struct Watcher {
    manager: ConnectionManager,
    session: SessionClient<ConnectionHandle>,
    navigation: NavigationSync<TerminalNavigator>,
    catalog: StaticCatalog,
    /// Room to join on the first connection
    pending_join: Option<String>,
}

async fn watch(config: ClientConfig, room: Option<String>, location: String) -> AppResult {
    let catalog = match &config.catalog {
        Some(path) => StaticCatalog::load(path)?,
        None => StaticCatalog::default(),
    };

    // A room in the starting location counts as a join request
    let pending_join = room.or_else(|| Location::parse(&location).ok()?.room());

    let manager = ConnectionManager::new(config.reconnect_policy());
    let session = SessionClient::new(manager.handle(), config.nickname.as_deref());
    println!("Watching as {}. Type /help for commands.", session.state().nickname);

    let mut watcher = Watcher {
        manager,
        session,
        navigation: NavigationSync::new(TerminalNavigator::new(location)),
        catalog,
        pending_join,
    };
    watcher.manager.connect(config.server).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = watcher.manager.next_event() => {
                let Some(event) = event else { break };
                if !watcher.on_event(event) {
                    break;
                }
            }
            line = lines.next_line() => {
                let keep_going = match line? {
                    Some(line) => watcher.on_line(&line).await,
                    None => false,
                };
                if !keep_going {
                    watcher.quit().await;
                    break;
                }
            }
        }
    }
    Ok(())
}

impl Watcher {
    /// Returns false once the connection is deliberately gone
    fn on_event(&mut self, event: NetworkEvent) -> bool {
        let connected = matches!(event, NetworkEvent::Connected { .. });
        let finished = matches!(event, NetworkEvent::Disconnected { deliberate: true });

        let request = self.session.handle(event.clone());
        for line in console::describe_event(&event, self.session.state().is_in_room(), &self.catalog)
        {
            println!("{}", line);
        }
        if let Some(request) = request {
            self.navigation.apply(request);
        }

        if connected {
            if let Some(code) = self.pending_join.take() {
                if let Err(e) = self.session.join_room(&code, None) {
                    println!("Error: {}", e);
                }
            }
        }
        !finished
    }

    /// Returns false when the user asked to quit
    async fn on_line(&mut self, line: &str) -> bool {
        let command = match console::parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(e) => {
                println!("{}", e);
                return true;
            }
        };

        let result = match command {
            Command::Create => self.session.create_room(),
            Command::Join { code, nickname } => self.session.join_room(&code, nickname.as_deref()),
            Command::Leave => self.session.leave_room().map(|request| {
                self.navigation.apply(request);
            }),
            Command::Episode { anime_id, episode } => self.change_episode(&anime_id, episode),
            Command::Nick(nickname) => self.session.set_nickname(&nickname).map(|()| {
                println!("Nickname is now {}", self.session.state().nickname);
            }),
            Command::Who => {
                let state = self.session.state();
                if state.is_in_room() {
                    println!("{}", console::render_members(&state.members));
                } else {
                    println!("Not in a room");
                }
                Ok(())
            }
            Command::Status => {
                let network = self.manager.state().await;
                println!(
                    "{} [{:?}] at {}",
                    console::render_status(self.session.state()),
                    network,
                    self.navigation.navigator().location()
                );
                if let Some(error) = &self.session.state().room_error {
                    println!("Last room error: {}", error);
                }
                Ok(())
            }
            Command::Help => {
                println!("{}", console::HELP);
                Ok(())
            }
            Command::Quit => return false,
            Command::Chat(text) => self.session.send_chat_message(&text),
        };

        if let Err(e) = result {
            println!("Error: {}", e);
        }
        true
    }

    /// Host: pick the episode, tell the room, then go there ourselves
    fn change_episode(
        &mut self,
        anime_id: &str,
        episode: Option<String>,
    ) -> watchparty_net::Result<()> {
        let pointer = match episode {
            Some(input) => match self.catalog.resolve(anime_id, &input) {
                Some(pointer) => pointer,
                None => EpisodePointer::new(anime_id, &input)?,
            },
            None => self.catalog.first(anime_id).ok_or_else(|| {
                watchparty_core::Error::Validation(format!("No episodes known for {}", anime_id))
            })?,
        };

        self.session
            .change_episode(&pointer.anime_id, &pointer.episode_id)?;
        println!(
            "Moved the room to {}",
            console::episode_label(&self.catalog, &pointer)
        );
        if let Some(code) = self.session.state().room_code.clone() {
            self.navigation.apply(NavigationRequest::Follow {
                code,
                episode: pointer,
            });
        }
        Ok(())
    }

    async fn quit(&mut self) {
        if self.session.state().is_in_room() {
            if let Ok(request) = self.session.leave_room() {
                self.navigation.apply(request);
            }
        }
        self.manager.disconnect().await;
        tracing::info!("Bye");
    }
}
