use std::{
    io::{self, Write as _},
    sync::Arc,
};

use anyhow::{Context as _, Result};
use clap::Parser as _;
use nowplaying::{
    config::SourcePattern,
    media_info::MediaInfo,
    out::{DisplayState, WaybarCustomModule},
    provider::mpris::MprisProvider,
    subscribers::MediaCallback,
    Monitor,
};

mod args;

use args::OutputFormat;

/// Observer printing one line per notification
fn printer(format: OutputFormat, fallback_source: SourcePattern) -> MediaCallback {
    Arc::new(move |info: &MediaInfo| -> Result<()> {
        match format {
            OutputFormat::Waybar => {
                let state = DisplayState::project(Some(info), &fallback_source);
                WaybarCustomModule::from_display_state(&state).print()?;
            }
            OutputFormat::Json => {
                let mut stdout = io::stdout().lock();
                serde_json::to_writer(&mut stdout, &info.to_json())?;
                stdout.write_all(b"\n")?;
            }
        }
        Ok(())
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = args::Args::parse();
    args.init_tracing_subscriber()?;
    let config = args.monitor_config()?;

    let provider = MprisProvider::session_bus().await?;
    let monitor = Monitor::new(provider, config.clone());
    let printer = printer(args.output, config.fallback_source);
    monitor.handle().on_media_changed(Arc::clone(&printer));
    monitor.handle().on_timeline_updated(printer);
    let handle = monitor.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    handle.stop().await;
    Ok(())
}
