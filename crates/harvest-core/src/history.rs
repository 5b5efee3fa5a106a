//! Per-channel history collection.

use harvest_store::Channel;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::threads::expand_thread;
use crate::walker::PageRequest;
use crate::window::CollectionWindow;
use crate::workspace::{Envelope, HarvestedMessage, MessagesResponse};

/// Errors after which a channel simply has nothing to offer this run.
const UNREADABLE_CHANNEL: [&str; 3] = ["channel_not_found", "missing_scope", "not_authed"];

/// Messages posted in `channel` within `window`, with the replies of every
/// thread root appended after their root.
///
/// Each `(channel, ts)` is returned at most once per run, even when a
/// reply also shows up in the channel history.
pub async fn fetch_channel_messages(
    ctx: &mut RunContext<'_>,
    channel: &Channel,
    window: &CollectionWindow,
    page_size: u32,
) -> Vec<HarvestedMessage> {
    let request = PageRequest::new("conversations.history")
        .param("channel", &channel.id)
        .param("oldest", window.oldest_ts())
        .param("latest", window.latest_ts())
        .param("inclusive", true)
        .param("limit", page_size.min(200));

    let (walker, reporter) = (ctx.walker, ctx.reporter);
    let mut collected = Vec::new();
    let mut pages = walker.pages(request, reporter);

    while let Some(page) = pages.next_page().await {
        let envelope = Envelope::of(&page);
        if let Some(code) = envelope.error_code() {
            if UNREADABLE_CHANNEL.contains(&code) {
                debug!("{} unreadable: {}", channel.id, code);
                return Vec::new();
            }
            warn!("history for {} stopped: {}", channel.id, code);
            break;
        }

        let messages = match page.parse::<MessagesResponse>() {
            Ok(response) => response.messages,
            Err(err) => {
                warn!("history for {}: {:#}", channel.id, err);
                break;
            }
        };

        for wire in messages {
            let message = match HarvestedMessage::from_wire(&channel.id, wire) {
                Ok(message) => message,
                Err(reason) => {
                    ctx.stats.messages_rejected += 1;
                    debug!("dropping message in {}: {}", channel.id, reason);
                    continue;
                }
            };

            let expand = message.is_thread_root();
            let root_ts = message.ts.clone();
            if ctx.first_sighting(&message.channel_id, &message.ts) {
                collected.push(message);
            }

            if expand {
                for reply in expand_thread(walker, reporter, &channel.id, &root_ts).await {
                    if ctx.first_sighting(&reply.channel_id, &reply.ts) {
                        collected.push(reply);
                    }
                }
            }
        }
    }

    ctx.stats.messages_seen += collected.len();
    collected
}
