//! Consent and error page rendering
//!
//! Inline HTML, no template files to deploy. The consent page lists the
//! requesting application, the scopes with their human descriptions, and
//! (for federated flows) the identity the IdP verified.

use crate::providers::ConsentPrompt;

/// Human description for a scope shown on the consent page.
fn scope_description(scope: &str) -> &'static str {
    match scope {
        "read" => "Read your data",
        "write" => "Modify your data",
        "payment" => "Initiate payments on your behalf",
        "account" => "Access your account details",
        _ => "Access granted by this scope",
    }
}

/// Minimal HTML escaping for interpolated values.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const PAGE_STYLE: &str = r#"
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Ubuntu, sans-serif;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            background: linear-gradient(135deg, #0f0f23 0%, #1a1a2e 50%, #16213e 100%);
            color: #e6e6e6;
            padding: 1rem;
        }
        .container { max-width: 420px; width: 100%; }
        h1 { font-size: 1.4rem; font-weight: 600; margin-bottom: 0.75rem; color: #fff; }
        .card {
            background: rgba(255,255,255,0.05);
            border: 1px solid rgba(255,255,255,0.1);
            border-radius: 12px;
            padding: 1.25rem;
            margin-bottom: 1.25rem;
        }
        .client-name { font-weight: 500; color: #64ffda; }
        .user { font-size: 0.875rem; color: #8892b0; margin-top: 0.5rem; }
        ul.scopes { list-style: none; margin-top: 0.75rem; }
        ul.scopes li { padding: 0.35rem 0; border-top: 1px solid rgba(255,255,255,0.06); }
        ul.scopes li:first-child { border-top: none; }
        .scope-id { font-family: monospace; font-size: 0.8rem; color: #6a7394; }
        .buttons { display: flex; gap: 0.75rem; }
        button {
            flex: 1;
            padding: 0.7rem 1rem;
            border-radius: 8px;
            border: none;
            font-size: 1rem;
            font-weight: 500;
            cursor: pointer;
        }
        button.approve { background: linear-gradient(135deg, #64ffda 0%, #00bcd4 100%); color: #0f0f23; }
        button.deny { background: transparent; border: 1px solid rgba(255,255,255,0.2); color: #8892b0; }
        .error { color: #ff6b6b; font-family: monospace; margin-bottom: 0.5rem; }
"#;

/// Render the consent page for either flow. The hidden fields route the
/// decision to the right approval endpoint.
pub fn render_consent(prompt: &ConsentPrompt) -> String {
    let client_name = escape(&prompt.client_name);

    let scope_items: String = prompt
        .scopes
        .iter()
        .map(|scope| {
            format!(
                "<li>{} <span class=\"scope-id\">({})</span></li>",
                scope_description(scope),
                escape(scope)
            )
        })
        .collect();

    let user_line = prompt
        .user
        .as_ref()
        .map(|user| {
            let who = user.email.as_deref().or(user.name.as_deref()).unwrap_or(&user.subject);
            format!("<div class=\"user\">Signed in as {}</div>", escape(who))
        })
        .unwrap_or_default();

    let (action, hidden_fields) = match (&prompt.code, &prompt.request) {
        (Some(code), _) => (
            "/oauth/consent/approve",
            format!("<input type=\"hidden\" name=\"code\" value=\"{}\">", escape(code)),
        ),
        (None, Some(request)) => (
            "/oauth/authorize/approve",
            format!(
                concat!(
                    "<input type=\"hidden\" name=\"client_id\" value=\"{}\">",
                    "<input type=\"hidden\" name=\"redirect_uri\" value=\"{}\">",
                    "<input type=\"hidden\" name=\"scope\" value=\"{}\">",
                    "<input type=\"hidden\" name=\"state\" value=\"{}\">",
                    "<input type=\"hidden\" name=\"code_challenge\" value=\"{}\">",
                    "<input type=\"hidden\" name=\"code_challenge_method\" value=\"{}\">",
                ),
                escape(&request.client_id),
                escape(&request.redirect_uri),
                escape(&request.scopes.join(" ")),
                escape(&request.state),
                escape(&request.code_challenge),
                escape(&request.code_challenge_method),
            ),
        ),
        (None, None) => ("/oauth/consent/approve", String::new()),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Authorization Request</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1>Authorization Request</h1>
        <div class="card">
            <div><span class="client-name">{client_name}</span> wants to access your tools</div>
            {user_line}
            <ul class="scopes">{scope_items}</ul>
        </div>
        <form method="post" action="{action}">
            {hidden_fields}
            <div class="buttons">
                <button class="approve" type="submit" name="action" value="approve">Approve</button>
                <button class="deny" type="submit" name="action" value="deny">Deny</button>
            </div>
        </form>
    </div>
</body>
</html>"#
    )
}

/// Render the HTML error page used when no safe redirect URI is known.
pub fn render_error(error: &str, description: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Authorization Error</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1>Authorization Error</h1>
        <div class="card">
            <div class="error">{}</div>
            <div>{}</div>
        </div>
    </div>
</body>
</html>"#,
        escape(error),
        escape(description)
    )
}
