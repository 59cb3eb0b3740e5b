use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use storyforge::client::{render_summary, run_create, CreateOptions, DEFAULT_POLL_INTERVAL};
use storyforge::core::config::Config;
use storyforge::server::start_server;

#[derive(Parser)]
#[command(name = "storyforge")]
#[command(about = "Illustrated, narrated story generation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and serve the frontend
    Serve {
        /// Port to listen on (overrides config.yml and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate a story through a running server
    Create {
        /// What the story should be about
        prompt: String,

        /// Base URL of the storyforge server
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,

        /// Stop after the visuals stage
        #[arg(long)]
        skip_audio: bool,

        /// Stop before video transitions
        #[arg(long)]
        skip_transitions: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port } => {
            let mut config = match Config::load() {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Error loading config: {:#}", e);
                    return Err(e);
                }
            };
            if let Some(port) = port {
                config.port = port;
            }
            start_server(&config).await?;
        }
        Commands::Create {
            prompt,
            server,
            skip_audio,
            skip_transitions,
        } => {
            let story = run_create(&CreateOptions {
                prompt,
                server,
                skip_audio,
                skip_transitions,
                poll_interval: DEFAULT_POLL_INTERVAL,
            })
            .await?;
            println!("{}", render_summary(&story));
        }
    }

    Ok(())
}
