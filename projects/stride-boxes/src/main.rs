mod cli;
mod process;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use process::process_video;
use tracing_subscriber::EnvFilter;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();
    let controller = args.pipeline.build_controller()?;

    match args.command {
        Command::Process { path, output_root } => {
            process_video(&controller, &path, &output_root, args.pipeline.frame_dir_fps).await?;
        }
        Command::Serve {
            host,
            port,
            video_root,
            output_root,
        } => {
            run_server(host, port, controller, video_root, output_root, args.pipeline.frame_dir_fps)
                .await?;
        }
    }

    Ok(())
}
