/// Smoke-test for `ChromiumFeedDriver`.
///
/// Opens the search feed for a keyword, lists the visible cards, scrolls
/// once and lists them again.
///
/// Run with:
///   cargo run -p gleaner-client --example feed_smoke --features browser -- 抽卡漫画
use gleaner_client::browser::DEFAULT_SITE;
use gleaner_client::{BrowserOptions, ChromiumFeedDriver, FeedSelectors, NoteExtractor, search_url};
use gleaner_core::traits::FeedDriver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let keyword = std::env::args().nth(1).unwrap_or_else(|| "抽卡漫画".to_string());
    let feed_url = search_url(DEFAULT_SITE, &keyword)?;
    let extractor = NoteExtractor::new(&FeedSelectors::default())?;

    println!("Opening {feed_url} …");
    let driver = ChromiumFeedDriver::launch(&feed_url, extractor, BrowserOptions::default()).await?;

    let before = driver.current_candidates().await?;
    println!("{} cards visible", before.len());
    for card in before.iter().take(5) {
        let kind = if card.ineligible { "video" } else { "image" };
        println!("  [{kind}] {}", card.identifier);
    }

    driver.reveal_more().await?;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let after = driver.current_candidates().await?;
    println!("{} cards visible after scrolling", after.len());
    Ok(())
}
