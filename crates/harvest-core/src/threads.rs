//! Thread reply expansion.

use tracing::{debug, warn};

use crate::progress::Reporter;
use crate::walker::{ApiWalker, PageRequest};
use crate::workspace::{Envelope, HarvestedMessage, MessagesResponse};

/// Every reply of the thread rooted at `thread_ts`, excluding the root.
///
/// System messages and messages without an author are dropped. A failure
/// part-way through returns what was collected so far.
pub async fn expand_thread(
    walker: &ApiWalker,
    reporter: &Reporter<'_>,
    channel_id: &str,
    thread_ts: &str,
) -> Vec<HarvestedMessage> {
    let request = PageRequest::new("conversations.replies")
        .param("channel", channel_id)
        .param("ts", thread_ts);

    let mut replies = Vec::new();
    let mut first_page = true;
    let mut pages = walker.pages(request, reporter);

    while let Some(page) = pages.next_page().await {
        if let Some(code) = Envelope::of(&page).error_code() {
            warn!("replies for {}/{}: {}", channel_id, thread_ts, code);
            break;
        }

        let messages = match page.parse::<MessagesResponse>() {
            Ok(response) => response.messages,
            Err(err) => {
                warn!("replies for {}/{}: {:#}", channel_id, thread_ts, err);
                break;
            }
        };

        // The first element of the first page is the root itself.
        let skip = usize::from(first_page);
        first_page = false;

        for wire in messages.into_iter().skip(skip) {
            if wire.ts.as_deref() == Some(thread_ts) {
                continue;
            }
            match HarvestedMessage::from_wire(channel_id, wire) {
                Ok(reply) => replies.push(reply),
                Err(reason) => debug!("dropping reply in {}: {}", channel_id, reason),
            }
        }
    }

    replies
}
