//! Link stripping and length limiting for relayed text.

/// Replaces each stripped link in the relayed text.
pub const LINK_PLACEHOLDER: &str = "(link removed)";

const ELLIPSIS: &str = "...";

const URL_PREFIXES: [&str; 4] = ["https://", "http://", "ftp://", "www."];

/// Text ready to relay plus the links taken out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContentSanitizer {
    max_length: usize,
}

impl ContentSanitizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Strip links from plain text and cap its length.
    ///
    /// Messages with attachments or rich embeds keep their links: a gif or a
    /// file caption is usually the whole point of the message.
    pub fn sanitize(&self, text: &str, has_rich_content: bool) -> Sanitized {
        let (text, links) = if has_rich_content {
            (text.to_string(), Vec::new())
        } else {
            strip_links(text)
        };

        Sanitized {
            text: truncate(&text, self.max_length),
            links,
        }
    }
}

/// Characters that may follow a URL prefix.
fn is_url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || (b'$'..=b'_').contains(&b)
        || matches!(b, b'!' | b'*' | b'(' | b')' | b',')
}

/// Byte length of the URL starting at the head of `rest`, if one starts there.
fn url_len_at(rest: &str) -> Option<usize> {
    let prefix = URL_PREFIXES.iter().find(|p| rest.starts_with(*p))?;
    let body = rest.as_bytes()[prefix.len()..]
        .iter()
        .take_while(|b| is_url_byte(**b))
        .count();
    (body > 0).then_some(prefix.len() + body)
}

/// Replace every URL with [`LINK_PLACEHOLDER`], returning the new text and the URLs found.
pub fn strip_links(text: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(text.len());
    let mut links = Vec::new();
    let mut copied_to = 0;
    let mut i = 0;

    while i < text.len() {
        if !text.is_char_boundary(i) {
            i += 1;
            continue;
        }
        match url_len_at(&text[i..]) {
            Some(len) => {
                out.push_str(&text[copied_to..i]);
                out.push_str(LINK_PLACEHOLDER);
                links.push(text[i..i + len].to_string());
                i += len;
                copied_to = i;
            }
            None => i += 1,
        }
    }
    out.push_str(&text[copied_to..]);
    (out, links)
}

/// Cap `text` at `max_chars` characters, ending in an ellipsis when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
