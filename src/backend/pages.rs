//! Static pages served by the backend.

pub const LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Login</title></head>
<body>
  <h1>Login</h1>
  <form method="POST" action="/login">
    <label>Username <input name="username" type="text"></label><br>
    <label>Password <input name="password" type="password"></label><br>
    <button type="submit">Sign in</button>
  </form>
</body>
</html>
"#;

/// Index page greeting `user`.
pub fn index(user: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Welcome</title></head>
<body>
  <h1>Welcome, {}</h1>
  <p>You are logged in.</p>
  <form method="POST" action="/logout"><button type="submit">Log out</button></form>
</body>
</html>
"#,
        escape(user)
    )
}

/// 401 page pointing back to the login form.
pub fn unauthorized(detail: &str) -> String {
    format!(
        "<html><body><h1>401 Unauthorized</h1><p>{}</p><a href=\"/login.html\">Login Here</a></body></html>",
        escape(detail)
    )
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
