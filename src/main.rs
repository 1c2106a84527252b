mod config;
mod error;
mod log;
mod mixer;
mod packet;
mod room;
mod server;
mod udp;
mod ws;

use config::ServerConfig;
use server::VoiceRelayServer;
use std::env;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("server") => {
            let config_path = match args.get(2) {
                Some(path) => path,
                None => {
                    eprintln!("Usage: {} server <config_file>", args[0]);
                    std::process::exit(1);
                }
            };

            let config = match ServerConfig::load(config_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to load config '{}': {}", config_path, e);
                    std::process::exit(1);
                }
            };

            let relay = VoiceRelayServer::new(config);
            if let Err(e) = relay.start().await {
                eprintln!("Server failed to start: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            println!("voxroom - group voice chat relay");
            println!("Usage: voxroom server <config_file>");
            std::process::exit(1);
        }
    }
}
