//! GitHub emoji shortcodes (`:tada:`) in markdown text.

use std::borrow::Cow;

use pulldown_cmark::CowStr;

/// Replace every known `:shortcode:` in `text` with its emoji.
///
/// Unknown names are left as written, and their closing colon may open the
/// next shortcode, so `:not-one:tada:` becomes `:not-one🎉`.
pub fn replace_shortcodes(text: &str) -> Cow<'_, str> {
    if !text.contains(':') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut replaced = false;

    while let Some(open) = rest.find(':') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let found = after
            .find(':')
            .map(|close| &after[..close])
            .filter(|name| is_shortcode_name(name))
            .and_then(|name| emojis::get_by_shortcode(name).map(|emoji| (name, emoji)));

        match found {
            Some((name, emoji)) => {
                out.push_str(emoji.as_str());
                rest = &after[name.len() + 1..];
                replaced = true;
            }
            None => {
                out.push(':');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    if replaced {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// [`replace_shortcodes`] over a pulldown-cmark text node, reusing the node
/// when nothing changes.
pub(crate) fn replace_in_text(text: CowStr<'_>) -> CowStr<'_> {
    let replaced = match replace_shortcodes(&text) {
        Cow::Owned(replaced) => Some(replaced),
        Cow::Borrowed(_) => None,
    };
    replaced.map_or(text, CowStr::from)
}

fn is_shortcode_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}
