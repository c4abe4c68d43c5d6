//! Instant Run - push incremental Android builds to a running app
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use irun_app::config::{init_config_dir, load_settings};
use irun_core::prelude::*;
use instant_run::commands::{self, CommandContext, DeployOptions};
use instant_run::DeployEvent;

/// Instant Run - push incremental Android builds to a running app
#[derive(Parser, Debug)]
#[command(name = "irun")]
#[command(about = "Push incremental Android builds to a running app", long_about = None)]
struct Args {
    /// Path to the Android project
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    /// Target device serial; the first online device when omitted
    #[arg(long, global = true, value_name = "SERIAL")]
    device: Option<String>,

    /// Application id; overrides build.application_id
    #[arg(long = "app-id", global = true, value_name = "ID")]
    app_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .irun/config.toml with defaults
    Init,

    /// List connected devices
    Devices,

    /// Show which build mode the next deploy would use
    Decide {
        /// Ask for a clean rebuild
        #[arg(long)]
        clean: bool,
    },

    /// Build and push the changes since the last deploy
    Deploy {
        /// Build command; overrides build.command
        #[arg(long = "build-cmd", value_name = "CMD")]
        build_cmd: Option<String>,

        /// Ask for a clean rebuild
        #[arg(long)]
        clean: bool,

        /// Restart the activity even if a hot swap would do
        #[arg(long)]
        force_restart: bool,
    },

    /// Record that the current build was installed in full
    RecordInstall,

    /// Check whether the app is running and in the foreground
    Ping,

    /// Restart the foreground activity
    RestartActivity,

    /// Show a toast inside the app
    Toast {
        /// Message to show
        text: String,
    },

    /// Delete patches the agent stored on the device
    WipeData,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    irun_core::logging::init()?;

    let args = Args::parse();
    let result = run(args).await;

    if let Err(ref e) = result {
        error!("Command failed: {:?}", e);
        DeployEvent::error(e.to_string(), e.is_fatal()).emit();
    }
    Ok(result?)
}

async fn run(args: Args) -> Result<()> {
    // Get project path from args or use current directory
    let project_path = args
        .project
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    info!("Project: {}", project_path.display());

    let mut emit = |event: DeployEvent| event.emit();

    if let Command::Init = args.command {
        let path = init_config_dir(&project_path)?;
        emit(DeployEvent::message(format!(
            "Configuration at {}",
            path.display()
        )));
        return Ok(());
    }

    let settings = load_settings(&project_path);
    settings.validate()?;

    let mut ctx = CommandContext::new(project_path, settings);
    ctx.application_id = args.app_id;
    ctx.device = args.device;

    let mut manager = commands::live_manager(&ctx)?;

    match args.command {
        Command::Init => {}
        Command::Devices => {
            commands::list_devices(&manager, &mut emit).await?;
        }
        Command::Decide { clean } => {
            commands::decide(&manager, &ctx, clean, &mut emit).await?;
        }
        Command::Deploy {
            build_cmd,
            clean,
            force_restart,
        } => {
            let options = DeployOptions {
                build_command: build_cmd,
                clean_rerun: clean,
                force_restart,
            };
            commands::deploy(&mut manager, &ctx, &options, &mut emit).await?;
        }
        Command::RecordInstall => {
            commands::record_install(&manager, &ctx, &mut emit).await?;
        }
        Command::Ping => {
            commands::ping(&manager, &ctx, &mut emit).await?;
        }
        Command::RestartActivity => {
            commands::restart_activity(&manager, &ctx, &mut emit).await?;
        }
        Command::Toast { text } => {
            commands::show_toast(&manager, &ctx, &text, &mut emit).await?;
        }
        Command::WipeData => {
            commands::wipe_data(&manager, &ctx, &mut emit).await?;
        }
    }

    Ok(())
}
