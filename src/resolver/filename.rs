use url::Url;

/// Split `text` at the last `separator`. Without a separator the whole text
/// is the second half, so a bare name has an empty stem.
pub fn split_on_last(text: &str, separator: char) -> (&str, &str) {
    match text.rfind(separator) {
        Some(pos) => (&text[..pos], &text[pos + separator.len_utf8()..]),
        None => ("", text),
    }
}

/// Make a downloaded file name safe to store: stem spaces and dots become
/// dashes, the extension is kept.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim().replace(['/', '\\'], "-");
    let (stem, ext) = split_on_last(&name, '.');
    if stem.is_empty() {
        return ext.trim().replace([' ', '.'], "-");
    }
    format!("{}.{}", stem.trim().replace([' ', '.'], "-"), ext.trim())
}

/// `{thread}-{reply:03}.{ext}` for images linked directly.
pub fn direct_image_name(thread_id: u64, reply: u32, ext: &str) -> String {
    format!("{}-{:03}.{}", thread_id, reply, ext)
}

/// Extension from the last path segment of `url`, `bin` when there is none.
pub fn extension_from_url(url: &str) -> String {
    let segment = last_path_segment(url).unwrap_or_default();
    let (stem, ext) = split_on_last(&segment, '.');
    if stem.is_empty() || ext.is_empty() {
        "bin".to_string()
    } else {
        ext.to_ascii_lowercase()
    }
}

/// Last non-empty path segment, query and fragment removed.
pub fn last_path_segment(url: &str) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()
            .map(str::to_string),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            path.trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }
    }
}
