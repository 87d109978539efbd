use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aamp_tsb::config::Config;
use aamp_tsb::tsb::events::{CachedFragment, MediaContext};
use aamp_tsb::tsb::{IncomingFragment, TrackType, TsbSessionManager, TuneType};

/// Demo media context that just logs what it would hand to a decoder.
struct LoggingMediaContext;

impl MediaContext for LoggingMediaContext {
    fn cache_tsb_fragment(&self, fragment: CachedFragment) {
        info!(
            position = fragment.position,
            duration = fragment.duration,
            bytes = fragment.bytes.len(),
            discontinuity = fragment.discontinuity,
            "delivered fragment to media pipeline"
        );
    }
}

#[derive(Parser)]
#[command(name = "aamp-tsb-demo")]
#[command(version = "0.1.0")]
#[command(about = "Local time-shift buffer subsystem demo harness")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Backing storage location for the TSB store (overrides config file)
    #[arg(short = 'l', long, value_name = "PATH")]
    tsb_location: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("aamp_tsb={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting aamp-tsb demo v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("TSB_CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(location) = cli.tsb_location {
        config.tsb.tsb_location = location.into();
    }

    info!(
        location = %config.tsb.tsb_location.display(),
        length_secs = config.tsb.tsb_length_secs,
        "initializing tsb session manager"
    );

    let manager = TsbSessionManager::init_with_slow_lock_warn_ms(
        config.tsb.tsb_location.clone(),
        config.tsb.tsb_length_secs,
        config.tsb.tsb_min_free_percentage,
        config.tsb.tsb_max_disk_storage_bytes,
        config.writer.queue_capacity,
        None,
        config.writer.slow_lock_warn_ms,
    )?;

    // Drive a short synthetic scenario to demonstrate the public API: write
    // an init segment and two media fragments, position a reader, then pull
    // them back.
    manager.enqueue_write(IncomingFragment {
        track: TrackType::Video,
        url: "https://example.invalid/init.mp4".to_string(),
        bytes: std::sync::Arc::new(b"INIT".to_vec()),
        abs_position_secs: 0.0,
        duration_secs: 0.0,
        period_id: "p0".to_string(),
        is_init: true,
        init_identity: "id-1".to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    });
    manager.enqueue_write(IncomingFragment {
        track: TrackType::Video,
        url: "https://example.invalid/v.mp4".to_string(),
        bytes: std::sync::Arc::new(b"FRAGMENT-A".to_vec()),
        abs_position_secs: 0.0,
        duration_secs: 2.0,
        period_id: "p0".to_string(),
        is_init: false,
        init_identity: "id-1".to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    });
    manager.enqueue_write(IncomingFragment {
        track: TrackType::Video,
        url: "https://example.invalid/v.mp4".to_string(),
        bytes: std::sync::Arc::new(b"FRAGMENT-B".to_vec()),
        abs_position_secs: 2.0,
        duration_secs: 2.0,
        period_id: "p0".to_string(),
        is_init: false,
        init_identity: "id-1".to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    });

    // Give the writer thread a moment to drain before reading back; a real
    // pipeline integration paces this off its own fragment delivery cadence.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    manager.invoke_tsb_readers(0.0, 1.0, TuneType::New)?;
    let media_context = LoggingMediaContext;
    while manager.push_next_tsb_fragment(TrackType::Video, 1, &media_context)? {}

    info!(
        total_duration = manager.get_total_store_duration(TrackType::Video),
        "demo scenario complete"
    );

    manager.flush();
    Ok(())
}
