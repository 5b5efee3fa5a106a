//! Channel enumeration across the four partition kinds.

use std::collections::HashSet;

use harvest_store::{Channel, ChannelKind};
use tracing::{info, warn};

use crate::context::RunContext;
use crate::walker::PageRequest;
use crate::workspace::{ChannelsResponse, Envelope, WireChannel};

/// Excludes public and private channels whose name contains a denylisted
/// pattern. DM partitions are never filtered.
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    patterns: Vec<String>,
}

impl ChannelFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_excluded(&self, kind: ChannelKind, name: &str) -> bool {
        if kind.is_dm() {
            return false;
        }
        let name = name.to_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

/// Label with a partition glyph, for progress text.
pub fn channel_label(channel: &Channel) -> String {
    match channel.kind {
        ChannelKind::Public => format!("#{}", channel.name),
        ChannelKind::Private => format!("🔒{}", channel.name),
        ChannelKind::GroupDm | ChannelKind::DirectDm => format!("💬{}", channel.name),
    }
}

/// Walk public, private, group-DM, and direct-DM partitions in that order
/// and return the deduplicated, filtered union.
pub async fn enumerate_channels(
    ctx: &mut RunContext<'_>,
    filter: &ChannelFilter,
    page_size: u32,
) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut seen = HashSet::new();

    ctx.reporter.log("📡 Listing channels...");

    for kind in ChannelKind::ALL {
        let request = PageRequest::new("conversations.list")
            .param("types", kind.as_str())
            .param("limit", page_size.min(200))
            .param("exclude_archived", true);

        let mut found = 0usize;
        let (walker, reporter) = (ctx.walker, ctx.reporter);
        let mut pages = walker.pages(request, reporter);
        while let Some(page) = pages.next_page().await {
            let envelope = Envelope::of(&page);
            if envelope.is_permission_error() {
                let code = envelope.error_code().unwrap_or_default();
                warn!("skipping {}: {}", kind.display_name(), code);
                ctx.reporter.log(&format!(
                    "⚠️ No permission to list {} ({}), skipping",
                    kind.display_name(),
                    code
                ));
                break;
            }
            if let Some(code) = envelope.error_code() {
                warn!("listing {} failed: {}", kind.display_name(), code);
                ctx.reporter.log(&format!(
                    "⚠️ Listing {} failed: {}",
                    kind.display_name(),
                    code
                ));
                break;
            }

            let batch = match page.parse::<ChannelsResponse>() {
                Ok(batch) => batch.channels,
                Err(err) => {
                    warn!("listing {}: {:#}", kind.display_name(), err);
                    break;
                }
            };

            for wire in batch {
                if wire.is_archived || seen.contains(&wire.id) {
                    continue;
                }
                let name = display_name(ctx, kind, &wire).await;
                if filter.is_excluded(kind, &name) {
                    info!("excluding channel {} ({})", name, wire.id);
                    continue;
                }
                seen.insert(wire.id.clone());
                channels.push(Channel {
                    id: wire.id,
                    name,
                    kind,
                    is_archived: false,
                });
                found += 1;
            }
        }

        info!("{}: {} channels", kind.display_name(), found);
    }

    ctx.reporter
        .log(&format!("✅ Found {} channels", channels.len()));
    channels
}

/// Name for a listed channel. DMs without a name get a synthesized one;
/// other unnamed channels fall back to their id.
async fn display_name(
    ctx: &mut RunContext<'_>,
    kind: ChannelKind,
    wire: &WireChannel,
) -> String {
    let listed = wire
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if let Some(name) = listed {
        return name.to_string();
    }

    match kind {
        ChannelKind::DirectDm => match wire.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => format!("DM: {}", ctx.resolve_author(user).await),
            None => "DM: Unknown".to_string(),
        },
        ChannelKind::GroupDm => "DM: Group".to_string(),
        ChannelKind::Public | ChannelKind::Private => wire.id.clone(),
    }
}
