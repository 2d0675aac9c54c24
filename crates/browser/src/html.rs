//! Post-processing of extracted HTML.

use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const DEFAULT_TAGS_TO_REMOVE: &[&str] = &["style", "svg", "script"];
pub const DEFAULT_ATTRIBUTES_TO_KEEP: &[&str] = &["id", "href"];

/// `name="value"` / `name='value'` pairs; names may carry one `-suffix`.
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(\w+(?:-\w+)?)\s*=\s*["'][^"']*["']"#)
        .unwrap_or_else(|e| panic!("invalid attribute regex: {e}"))
});

/// Strip `tags_to_remove` elements (with their content) and every attribute
/// whose name is not in `attributes_to_keep`.
///
/// A kept name also keeps its `-suffixed` variants (`id` keeps `id-ref`).
pub fn clean_html<T, A>(html: &str, tags_to_remove: &[T], attributes_to_keep: &[A]) -> String
where
    T: AsRef<str>,
    A: AsRef<str>,
{
    let mut cleaned = html.to_string();
    for tag in tags_to_remove {
        let tag = regex::escape(tag.as_ref());
        match Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")) {
            Ok(re) => cleaned = re.replace_all(&cleaned, "").into_owned(),
            Err(e) => tracing::warn!(tag = %tag, error = %e, "skipping tag pattern"),
        }
    }

    ATTRIBUTE
        .replace_all(&cleaned, |caps: &Captures<'_>| {
            if is_kept(&caps[1], attributes_to_keep) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn is_kept<A: AsRef<str>>(name: &str, keep: &[A]) -> bool {
    keep.iter().map(AsRef::as_ref).any(|k| {
        name == k
            || name
                .strip_prefix(k)
                .is_some_and(|rest| rest.starts_with('-'))
    })
}
