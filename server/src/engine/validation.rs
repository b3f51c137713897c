use crate::error::{RelayError, RelayResult};

/// Maximum network name length, in characters.
pub const MAX_NETWORK_NAME_LENGTH: usize = 100;

/// Clean a user-supplied network name: channel, user and role mentions
/// (`<#1>`, `<@1>`, `<@!1>`, `<@&1>`) are removed and the result is trimmed.
pub fn sanitize_network_name(raw: &str) -> RelayResult<String> {
    let cleaned = strip_mentions(raw);
    let name = cleaned.trim();
    if name.is_empty() {
        return Err(RelayError::InvalidNetworkName);
    }
    Ok(name.chars().take(MAX_NETWORK_NAME_LENGTH).collect())
}

fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match mention_len(candidate) {
            Some(len) => rest = &candidate[len..],
            None => {
                out.push('<');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte length of a mention at the start of `s`, if there is one.
fn mention_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    match bytes.get(i)? {
        b'#' | b'&' | b'!' => i += 1,
        b'@' => {
            i += 1;
            if matches!(bytes.get(i), Some(b'!' | b'&')) {
                i += 1;
            }
        }
        _ => return None,
    }
    let digits_start = i;
    while bytes.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    if i == digits_start || bytes.get(i) != Some(&b'>') {
        return None;
    }
    Some(i + 1)
}

/// A user id as typed into a moderation channel: non-empty and all digits.
pub fn parse_user_id(text: &str) -> Option<&str> {
    let id = text.trim();
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}
