/// Remove NUL bytes and surrounding whitespace.
pub fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Convert an HTML fragment to plain text, keeping the input when conversion fails.
pub fn html_to_text(html: &str) -> String {
    match htmd::convert(html) {
        Ok(text) => sanitize_text(&text),
        Err(err) => {
            log::warn!("html conversion failed, keeping raw body: {}", err);
            sanitize_text(html)
        }
    }
}

/// True when the mimetype denotes an HTML part.
pub fn is_html(mimetype: &str) -> bool {
    mimetype.eq_ignore_ascii_case("text/html")
}
