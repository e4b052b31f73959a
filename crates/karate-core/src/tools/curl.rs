//! Convert a Karate request log into a `curl` command.
//!
//! Karate logs outgoing requests as
//!
//! ```text
//! 1 > POST http://localhost:8080/users
//! 1 > Content-Type: application/json
//! {"name":"x"}
//! ```

use super::{Result, ToolError};
use regex::Regex;
use std::sync::LazyLock;

static REQUEST_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*>\s*(.*)$").expect("request line pattern is valid"));

/// Parsed request pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KarateRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl KarateRequest {
    pub fn parse(log: &str) -> Result<Self> {
        let mut method = None;
        let mut url = None;
        let mut headers = Vec::new();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut in_request = false;

        for raw in log.lines() {
            let line = raw.trim();

            if let Some(caps) = REQUEST_LINE_RE.captures(line) {
                in_request = true;
                let content = caps.get(2).map_or("", |m| m.as_str()).trim();

                if method.is_none() {
                    let (verb, rest) = content.split_once(' ').unwrap_or((content, ""));
                    if is_http_method(verb) {
                        method = Some(verb.to_string());
                        url = Some(rest.trim().to_string());
                        continue;
                    }
                }
                if !content.starts_with('{') {
                    if let Some((key, value)) = content.split_once(':') {
                        headers.push((key.trim().to_string(), value.trim().to_string()));
                    }
                }
                continue;
            }

            if !in_request {
                continue;
            }
            if line.is_empty() {
                if !body_lines.is_empty() {
                    break;
                }
                continue;
            }
            // Response lines end the request block.
            if line.contains(" < ") || line.starts_with('<') {
                break;
            }
            body_lines.push(line);
        }

        let method = method.ok_or(ToolError::MissingMethod)?;
        let url = url.filter(|u| !u.is_empty()).ok_or(ToolError::MissingUrl)?;
        let body = (!body_lines.is_empty()).then(|| compact_body(&body_lines.join("\n")));

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    /// Render as a single-line `curl` command. `Content-Length` is dropped.
    pub fn to_curl(&self) -> String {
        let mut cmd = format!("curl -X {}", self.method);
        for (key, value) in &self.headers {
            if key.eq_ignore_ascii_case("content-length") {
                continue;
            }
            cmd.push_str(" -H ");
            cmd.push_str(&shell_quote(&format!("{key}: {value}")));
        }
        if let Some(body) = &self.body {
            cmd.push_str(" -d ");
            cmd.push_str(&shell_quote(body));
        }
        cmd.push(' ');
        cmd.push_str(&shell_quote(&self.url));
        cmd
    }
}

/// Single-quote for POSIX shells; embedded quotes become `'\''`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn is_http_method(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_uppercase())
}

fn compact_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .map_or_else(|_| body.to_string(), |value| value.to_string())
}

/// Convert a Karate request log into a `curl` command.
pub fn from_karate_log(log: &str) -> Result<String> {
    KarateRequest::parse(log).map(|req| req.to_curl())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn converts_post_with_headers_and_body() {
        let log = "\
13:00:01.000 request:
1 > POST http://localhost:8080/users
1 > Content-Type: application/json; charset=UTF-8
1 > Content-Length: 15
1 > Host: localhost:8080
{
  \"name\": \"O'Neil\"
}
";
        assert_eq!(
            from_karate_log(log).unwrap(),
            "curl -X POST -H 'Content-Type: application/json; charset=UTF-8' \
             -H 'Host: localhost:8080' -d '{\"name\":\"O'\\''Neil\"}' \
             'http://localhost:8080/users'"
        );
    }

    #[test]
    fn converts_get_without_body() {
        let log = "1 > GET https://api.example.com/health?full=true\n1 > Accept: */*\n\n1 < 200\n";
        let req = KarateRequest::parse(log).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "https://api.example.com/health?full=true");
        assert_eq!(req.headers, vec![("Accept".to_string(), "*/*".to_string())]);
        assert!(req.body.is_none());
        assert_eq!(
            req.to_curl(),
            "curl -X GET -H 'Accept: */*' 'https://api.example.com/health?full=true'"
        );
    }

    #[test]
    fn shell_metacharacters_stay_literal() {
        let log = "1 > GET http://x/a?q=$USER&b=`id`\n1 > Cookie: s=\"$HOME\"; t='x'\n";
        assert_eq!(
            from_karate_log(log).unwrap(),
            r#"curl -X GET -H 'Cookie: s="$HOME"; t='\''x'\''' 'http://x/a?q=$USER&b=`id`'"#
        );
    }

    #[test]
    fn non_json_body_kept_verbatim() {
        let req = KarateRequest::parse("1 > PUT http://x/a\nname=value\n").unwrap();
        assert_eq!(req.body.as_deref(), Some("name=value"));
    }

    #[test]
    fn missing_method_or_url_is_an_error() {
        assert!(matches!(from_karate_log("hello"), Err(ToolError::MissingMethod)));
        assert!(matches!(from_karate_log("1 > Accept: x"), Err(ToolError::MissingMethod)));
        assert!(matches!(from_karate_log("1 > GET  "), Err(ToolError::MissingUrl)));
    }
}
