//! Tag extraction and normalisation across title, body and explicit
//! category sets.
//!
//! A tag is a `#`-marked word token or a token opening with an emoji
//! rune. Identity is decided on the folded form (NFD, nonspacing marks
//! stripped, NFC, lowercased) while the displayed tag keeps the casing
//! and diacritics of its first occurrence; a caller-supplied vocabulary
//! of known tags canonicalizes the casing of previously-seen ones.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// The tag marker character.
const MARKER: char = '#';

/// Result of [`normalise`]: cleaned-up title and body plus the merged,
/// sorted tag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalised {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

/// Emoji-ish rune ranges that open a tag without a marker: pictographs,
/// symbols, flags and the combining diacritical marks for symbols.
// http://cldr-build.unicode.org/UnicodeJsps/list-unicodeset.jsp?a=%5B%3Aemoji%3A%5D&g=emoji
pub fn is_emoji_rune(c: char) -> bool {
    matches!(c,
        '\u{20d0}'..='\u{20ff}'        // Combining Diacritical Marks for Symbols
        | '\u{2328}'                   // keyboard
        | '\u{238c}'..='\u{2454}'      // Misc items
        | '\u{2600}'..='\u{26ff}'      // Misc symbols
        | '\u{2700}'..='\u{27bf}'      // Dingbats
        | '\u{2b50}'                   // star
        | '\u{fe00}'..='\u{fe0f}'      // Variation Selectors
        | '\u{1f018}'..='\u{1f270}'    // Various asian characters
        | '\u{1f1e6}'..='\u{1f1ff}'    // Regional country flags
        | '\u{1f300}'..='\u{1f5ff}'    // Misc Symbols and Pictographs
        | '\u{1f600}'..='\u{1f64f}'    // Emoticons
        | '\u{1f680}'..='\u{1f6ff}'    // Transport and Map
        | '\u{1f900}'..='\u{1f9ff}')   // Supplemental Symbols and Pictographs
}

/// Punctuation trimmed off tag candidates. `@ § † #` survive because
/// they carry meaning inside tags.
fn is_tag_punct(c: char) -> bool {
    match c {
        '@' | '§' | '†' | MARKER => false,
        _ => {
            c.is_ascii_punctuation()
                || matches!(c,
                    '\u{00a1}' | '\u{00bf}' | '\u{00ab}' | '\u{00bb}'
                    | '\u{2010}'..='\u{2027}'
                    | '\u{2030}'..='\u{205e}'
                    | '\u{3001}' | '\u{3002}')
        }
    }
}

/// Extract the tag carried by one whitespace token, or empty when the
/// token is no tag. Only the first rune decides: a marker is stripped,
/// an emoji keeps the whole token, anything else disqualifies it.
/// Leading/trailing punctuation is trimmed afterwards, so a marker
/// followed by punctuation alone yields empty.
fn tag_of_token(token: &str) -> &str {
    let mut tag = token;
    if let Some(first) = token.chars().next() {
        if first == MARKER {
            tag = &token[first.len_utf8()..];
        } else if !is_emoji_rune(first) {
            return "";
        }
    }
    tag.trim_matches(is_tag_punct)
}

/// All tags embedded in free text, in order of first occurrence, deduped
/// on the raw surface form.
pub fn tags_from_text(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    seen.insert(String::new());
    let mut ret = Vec::new();
    for token in text.split_whitespace() {
        let tag = tag_of_token(token);
        if seen.insert(tag.to_owned()) {
            ret.push(tag.to_owned());
        }
    }
    ret
}

/// Case- and diacritic-fold for tag identity: canonical decomposition,
/// nonspacing marks stripped, recomposition, lowercased, trimmed.
pub fn fold(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_owned()
}

/// Merge the tags of `title` and `body` with the `explicit` category
/// terms, folding for identity, first-seen surface form winning and the
/// `known` vocabulary canonicalizing casing. Explicit tags absent from
/// the text are appended to the body as trailing ` #tag` annotations.
/// The returned tag set is sorted; the whole operation is idempotent.
pub fn normalise(title: &str, body: &str, explicit: &[String], known: &[String]) -> Normalised {
    let mut canonical = std::collections::HashMap::<String, &String>::new();
    for tag in known {
        canonical.insert(fold(tag), tag);
    }

    let mut seen = std::collections::HashMap::<String, String>::new();
    seen.insert(String::new(), String::new());
    let mut tags: Vec<String> = Vec::new();

    let mut add = |tag: &str, tags: &mut Vec<String>| -> Option<String> {
        let key = fold(tag);
        if seen.contains_key(&key) {
            return None;
        }
        let surface = canonical
            .get(&key)
            .map(|t| (*t).clone())
            .unwrap_or_else(|| tag.to_owned());
        seen.insert(key, surface.clone());
        tags.push(surface.clone());
        Some(surface)
    };

    for tag in tags_from_text(title)
        .into_iter()
        .chain(tags_from_text(body))
    {
        add(&tag, &mut tags);
    }

    let mut missing: Vec<String> = explicit
        .iter()
        .filter_map(|tag| add(tag, &mut tags))
        .collect();
    missing.sort_by_key(|t| fold(t));

    let mut body = body.to_owned();
    for tag in &missing {
        body.push_str(" #");
        body.push_str(tag);
    }

    tags.sort();
    Normalised {
        title: title.trim().to_owned(),
        body: body.trim().to_owned(),
        tags,
    }
}
