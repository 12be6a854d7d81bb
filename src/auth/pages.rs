//! HTML shown in the browser tab after the identity provider redirects back

/// Text the tests look for in each page.
pub const SUCCESS_MARKER: &str = "Sign-in complete";
pub const ERROR_MARKER: &str = "Sign-in failed";
pub const WAITING_MARKER: &str = "Waiting for sign-in";

#[derive(Debug, Clone)]
pub enum Page {
    Success,
    Error { code: String, description: String },
    Waiting,
}

pub fn render(page: &Page) -> String {
    match page {
        Page::Success => layout(
            SUCCESS_MARKER,
            "<p>You are signed in. This tab closes in a few seconds; return to your terminal.</p>\
             <script>setTimeout(function () { window.close(); }, 3000);</script>",
        ),
        Page::Error { code, description } => layout(
            ERROR_MARKER,
            &format!(
                "<p><code>{}</code></p><p>{}</p><p>Close this tab and try again.</p>",
                escape(code),
                escape(description)
            ),
        ),
        Page::Waiting => layout(
            WAITING_MARKER,
            "<p>Finish signing in with your identity provider. This page is not the final step.</p>",
        ),
    }
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">\n\
         <h2>{title}</h2>\n{body}\n</body>\n</html>\n"
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
