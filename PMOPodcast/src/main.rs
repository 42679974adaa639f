use anyhow::{Context, bail};
use futures::StreamExt;
use pmoconfig::{Config, get_config};
use pmopodcast::{FeedService, FeedSnapshot, PodcastConfigExt, SnapshotDelivery};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Description length shown on episode cards
const CARD_EXCERPT_CHARS: usize = 80;

const USAGE: &str = "usage: PMOPodcast [--feed <url>] [--relay <template>] [--recent <count>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();
    init_logging(&config);

    apply_args(&config, std::env::args().skip(1))?;

    let fetcher = config
        .podcast_fetcher()
        .context("no feed configured, pass --feed <url> or set podcast.feed_url")?;
    let cache = config.podcast_cache_store()?;
    info!("📡 Feed {} (cache {})", fetcher.feed_url(), cache.path().display());

    let recent_count = config.get_podcast_episodes_to_show()?;
    let placeholder = config.get_podcast_placeholder_image()?;

    let service = FeedService::new(Arc::new(fetcher), Arc::new(cache));
    let deliveries = service.snapshots();
    futures::pin_mut!(deliveries);

    let mut delivered = 0;
    while let Some(delivery) = deliveries.next().await {
        let origin = match &delivery {
            SnapshotDelivery::Cached(_) => "cached",
            SnapshotDelivery::Fresh(_) => "fresh",
        };
        render(delivery.snapshot(), origin, recent_count, &placeholder);
        delivered += 1;
    }

    if delivered == 0 {
        bail!("could not load the feed and no cached copy is available");
    }
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config
            .get_log_min_level()
            .unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level.to_lowercase())
    });

    let subscriber = tracing_subscriber::registry().with(filter);
    if config.get_log_enable_console().unwrap_or(true) {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}

/// Command line values are written to the configuration and kept for the
/// next runs.
fn apply_args(config: &Config, mut args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    while let Some(arg) = args.next() {
        let mut value = || args.next().with_context(|| format!("missing value for {}\n{}", arg, USAGE));
        match arg.as_str() {
            "--feed" => config.set_podcast_feed_url(&value()?)?,
            "--relay" => config.set_podcast_relay_template(&value()?)?,
            "--recent" => {
                let count = value()?
                    .parse()
                    .with_context(|| format!("--recent expects a number\n{}", USAGE))?;
                config.set_podcast_episodes_to_show(count)?;
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => {
                warn!("Ignoring unknown argument {}", other);
            }
        }
    }
    Ok(())
}

fn render(snapshot: &FeedSnapshot, origin: &str, recent_count: usize, placeholder: &str) {
    println!();
    println!("=== {} [{}] ===", snapshot.title, origin);

    let Some(featured) = snapshot.featured() else {
        println!("No episodes available.");
        return;
    };

    println!();
    println!("▶ {}", featured.title);
    println!("  {} · {}", featured.published_at, featured.duration);
    println!("  {}", featured.description);
    println!("  image: {}", featured.display_image(placeholder));
    if featured.is_playable() {
        println!("  audio: {}", featured.audio_url);
    } else {
        println!("  audio: unavailable");
    }

    let recent = snapshot.recent(recent_count);
    if recent.is_empty() {
        return;
    }

    println!();
    println!("Recent episodes:");
    for episode in recent {
        println!("  • {} ({})", episode.title, episode.published_at);
        println!("    {}", episode.excerpt(CARD_EXCERPT_CHARS));
        println!("    {} · {}", episode.duration, episode.display_image(placeholder));
    }
}
