//! HTML pages served to the browser

use crate::error::Error;

const PAGE_STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 20px; }
        #progress { margin-top: 20px; padding: 10px; border: 1px solid #ccc;
                    border-radius: 5px; max-height: 400px; overflow-y: auto; }
        .message { margin: 5px 0; padding: 5px; }
        .error { color: red; }
        .success { color: green; }
        .prompt { margin: 10px 0; padding: 10px; background-color: #f0f0f0; border-radius: 5px; }
        .options { margin-top: 10px; }
        .option { display: inline-block; margin-right: 10px; padding: 5px 10px;
                  background-color: #4CAF50; color: white; border: none;
                  border-radius: 3px; cursor: pointer; }
        .option:hover { background-color: #45a049; }
"#;

/// Renders progress events as they arrive and posts prompt choices to `/handle_option`
const PROGRESS_SCRIPT: &str = r#"
        const progressDiv = document.getElementById('progress');
        const eventSource = new EventSource('/progress');

        function appendMessage(text, extraClass) {
            const div = document.createElement('div');
            div.className = extraClass ? 'message ' + extraClass : 'message';
            div.textContent = text;
            progressDiv.appendChild(div);
        }

        eventSource.onmessage = function(e) {
            const data = JSON.parse(e.data);

            if (data.type === 'prompt') {
                const promptDiv = document.createElement('div');
                promptDiv.className = 'prompt';
                const messageDiv = document.createElement('div');
                messageDiv.textContent = data.message;
                promptDiv.appendChild(messageDiv);

                const optionsDiv = document.createElement('div');
                optionsDiv.className = 'options';
                (data.options || []).forEach(option => {
                    const button = document.createElement('button');
                    button.className = 'option';
                    button.textContent = option;
                    button.onclick = function() {
                        appendMessage('Selected: ' + option);
                        fetch('/handle_option', {
                            method: 'POST',
                            headers: { 'Content-Type': 'application/json' },
                            body: JSON.stringify({ option }),
                        });
                    };
                    optionsDiv.appendChild(button);
                });
                promptDiv.appendChild(optionsDiv);
                progressDiv.appendChild(promptDiv);
            } else if (data.message.includes('Error')) {
                appendMessage(data.message, 'error');
            } else if (data.message.includes('Success')) {
                appendMessage(data.message, 'success');
            } else {
                appendMessage(data.message);
            }

            progressDiv.scrollTop = progressDiv.scrollHeight;
        };

        eventSource.onerror = function(e) {
            console.error('EventSource failed:', e);
            eventSource.close();
        };
"#;

fn layout(body: &str, script: Option<&str>) -> String {
    let script = script
        .map(|s| format!("<script>{s}</script>"))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>OneNote Image Fetcher</title>\n<style>{PAGE_STYLE}</style>\n</head>\n\
         <body>\n<h2>OneNote Image Fetcher</h2>\n{body}\n{script}\n</body>\n</html>\n"
    )
}

/// Sign-in page linking to the identity provider
pub fn login_page(authorization_url: &str) -> String {
    layout(
        &format!(
            "<a href=\"{}\">Click here to authenticate</a>",
            escape_html(authorization_url)
        ),
        None,
    )
}

/// Live progress page fed by `/progress`
pub fn progress_page() -> String {
    layout("<div id=\"progress\"></div>", Some(PROGRESS_SCRIPT))
}

/// Page shown when the OAuth callback fails
pub fn error_page(error: &Error) -> String {
    layout(
        &format!(
            "<p class=\"error\">{}</p>\n<p><a href=\"/\">Try again</a></p>",
            escape_html(&error.to_string())
        ),
        None,
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
