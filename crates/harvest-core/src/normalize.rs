//! Message text normalization.
//!
//! Raw workspace text carries HTML entities and angle-bracket markup for
//! mentions, channel references, and links. [`normalize`] turns it into
//! plain display text:
//!
//! 1. HTML entities are unescaped.
//! 2. `<@U123>` and `<@U123|label>` become `@Display Name`.
//! 3. `<#C123|general>` becomes `#general`.
//! 4. `<https://x|label>` and `<https://x>` become `https://x`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::context::RunContext;

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|[^>]*)?>").expect("valid mention regex"));

static CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<#([CG][A-Z0-9]+)\|([^>]+)>").expect("valid channel regex"));

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<((?:https?|mailto):[^|>]+)(?:\|[^>]*)?>").expect("valid link regex")
});

static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").expect("valid entity regex"));

/// Normalize `text`, resolving mentions through the run's author directory.
pub async fn normalize(ctx: &mut RunContext<'_>, text: &str) -> String {
    let text = unescape_html(text);

    let mut names = HashMap::new();
    for id in mention_ids(&text) {
        if !names.contains_key(&id) {
            let name = ctx.resolve_author(&id).await;
            names.insert(id, name);
        }
    }

    render(&text, &names)
}

/// Author ids mentioned in `text`, in order of appearance.
pub fn mention_ids(text: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Apply mention, channel, and link rewriting with an already-resolved
/// name map. Ids missing from `names` render as the raw id.
pub fn render(text: &str, names: &HashMap<String, String>) -> String {
    let text = MENTION_RE.replace_all(text, |caps: &Captures| {
        let id = &caps[1];
        let name = names.get(id).map(String::as_str).unwrap_or(id);
        format!("@{}", name)
    });
    let text = CHANNEL_RE.replace_all(&text, "#$2");
    let text = LINK_RE.replace_all(&text, "$1");
    text.into_owned()
}

/// Decode the HTML entities the workspace API emits, plus numeric
/// references. Unknown named entities are left as-is.
pub fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<String> {
    let decoded = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some(decoded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Reporter, TracingSink};
    use crate::testing::ScriptedTransport;
    use crate::walker::{ApiWalker, RawResponse, RetryPolicy};
    use serde_json::json;
    use std::sync::Arc;

    fn names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_normalizes_markup_with_directory_lookup() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.always(
            "users.info",
            &[("user", "U1")],
            RawResponse::json(json!({"ok": true, "user": {"id": "U1", "real_name": "Alice"}})),
        );
        let walker = ApiWalker::new(transport.clone(), RetryPolicy::default());
        let sink = TracingSink;
        let reporter = Reporter::new(&sink);
        let mut ctx = RunContext::new(&walker, None, &reporter);

        let out = normalize(&mut ctx, "<@U1> see <#C1|general> <http://x|link>").await;
        assert_eq!(out, "@Alice see #general http://x");

        let again = normalize(&mut ctx, "<@U1|alice> &amp; <@U1>").await;
        assert_eq!(again, "@Alice & @Alice");
        assert_eq!(transport.call_count("users.info"), 1);
    }

    #[test]
    fn test_render_is_idempotent() {
        let map = names(&[("U1", "Alice")]);
        let once = render(
            &unescape_html("<@U1> &lt;3 <#C9|dev> <https://a.b/c?d=1|docs> <mailto:x@y.z>"),
            &map,
        );
        assert_eq!(once, "@Alice <3 #dev https://a.b/c?d=1 mailto:x@y.z");

        let twice = render(&unescape_html(&once), &map);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_unresolved_mentions_keep_raw_id() {
        assert_eq!(render("ping <@U77>", &HashMap::new()), "ping @U77");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_html("a &amp; b &lt;c&gt; &quot;d&quot; &#39;e&#39;"), "a & b <c> \"d\" 'e'");
        assert_eq!(unescape_html("&#x1F600; &bogus; plain"), "😀 &bogus; plain");
        assert_eq!(unescape_html("no entities"), "no entities");
    }

    #[test]
    fn test_mention_ids_in_order() {
        assert_eq!(mention_ids("<@U2> and <@W1|bob> and <@U2>"), vec!["U2", "W1", "U2"]);
    }
}
