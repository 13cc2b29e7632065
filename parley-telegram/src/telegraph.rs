//! Telegraph long-form publishing.
//!
//! An account is created on first use and reused for the life of the
//! publisher. Answers are converted to Telegraph's node tree: paragraphs,
//! headings and preformatted blocks.

use async_trait::async_trait;
use parley_common::util::char_prefix;
use parley_common::TelegraphConfig;
use parley_engine::{LongFormPublisher, PublishError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::api::Envelope;

const DEFAULT_API_BASE: &str = "https://api.telegra.ph";
const MAX_TITLE_CHARS: usize = 256;

/// A Telegraph content node: bare text or an element with children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Text(String),
    Element {
        tag: &'static str,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        children: Vec<Node>,
    },
}

impl Node {
    fn element(tag: &'static str, children: Vec<Node>) -> Self {
        Self::Element { tag, children }
    }
}

#[derive(Debug, Deserialize)]
struct Account {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    url: String,
}

/// [`LongFormPublisher`] backed by telegra.ph.
pub struct TelegraphPublisher {
    client: reqwest::Client,
    api_base: String,
    short_name: String,
    author_name: String,
    access_token: OnceCell<String>,
}

impl TelegraphPublisher {
    pub fn new(short_name: impl Into<String>, author_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            short_name: short_name.into(),
            author_name: author_name.into(),
            access_token: OnceCell::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// `None` when publishing is disabled.
    pub fn from_config(config: &TelegraphConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(&config.short_name, &config.author_name).with_api_base(&config.api_base)
        })
    }

    async fn access_token(&self) -> Result<&str, PublishError> {
        self.access_token
            .get_or_try_init(|| async {
                let account: Account = self
                    .call(
                        "createAccount",
                        &json!({
                            "short_name": self.short_name,
                            "author_name": self.author_name,
                        }),
                    )
                    .await?;
                tracing::info!(short_name = %self.short_name, "Created Telegraph account");
                Ok::<_, PublishError>(account.access_token)
            })
            .await
            .map(String::as_str)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, PublishError> {
        let url = format!("{}/{method}", self.api_base);
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout
                } else {
                    PublishError::Failed(format!("{method}: {e}"))
                }
            })?;

        let status = resp.status();
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| PublishError::Failed(format!("{method} returned HTTP {status}: {e}")))?;
        envelope
            .into_result()
            .map_err(|description| PublishError::Failed(format!("{method} failed: {description}")))
    }
}

#[async_trait]
impl LongFormPublisher for TelegraphPublisher {
    async fn publish_long_form(&self, title: &str, text: &str) -> Result<String, PublishError> {
        let access_token = self.access_token().await?;
        let title = match char_prefix(title.trim(), MAX_TITLE_CHARS) {
            "" => "Answer",
            title => title,
        };

        let page: Page = self
            .call(
                "createPage",
                &json!({
                    "access_token": access_token,
                    "title": title,
                    "author_name": self.author_name,
                    "content": to_nodes(text),
                    "return_content": false,
                }),
            )
            .await?;

        tracing::info!(url = %page.url, chars = text.chars().count(), "Published to Telegraph");
        Ok(page.url)
    }
}

/// Split Markdown-ish text into Telegraph nodes.
///
/// Blank lines separate paragraphs, single newlines become `br`, `#`
/// headings become `h3`/`h4` and fenced code becomes `pre`.
pub fn to_nodes(text: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut code: Option<Vec<&str>> = None;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match code.take() {
                Some(block) => nodes.push(pre(&block)),
                None => {
                    flush_paragraph(&mut paragraph, &mut nodes);
                    code = Some(Vec::new());
                }
            }
            continue;
        }
        if let Some(block) = code.as_mut() {
            block.push(line);
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut nodes);
        } else if let Some(heading) = heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut nodes);
            nodes.push(heading);
        } else {
            paragraph.push(line);
        }
    }

    if let Some(block) = code {
        nodes.push(pre(&block));
    }
    flush_paragraph(&mut paragraph, &mut nodes);
    nodes
}

fn pre(lines: &[&str]) -> Node {
    Node::element("pre", vec![Node::Text(lines.join("\n"))])
}

fn heading(line: &str) -> Option<Node> {
    let level = line.chars().take_while(|&c| c == '#').count();
    let title = line[level..].strip_prefix(' ')?.trim();
    if level == 0 || level > 6 || title.is_empty() {
        return None;
    }
    let tag = if level <= 2 { "h3" } else { "h4" };
    Some(Node::element(tag, vec![Node::Text(title.to_string())]))
}

fn flush_paragraph(lines: &mut Vec<&str>, nodes: &mut Vec<Node>) {
    if lines.is_empty() {
        return;
    }
    let mut children = Vec::with_capacity(lines.len() * 2);
    for (i, line) in lines.drain(..).enumerate() {
        if i > 0 {
            children.push(Node::element("br", Vec::new()));
        }
        children.push(Node::Text(line.to_string()));
    }
    nodes.push(Node::element("p", children));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_and_breaks() {
        let nodes = to_nodes("first line\nsecond line\n\nnext paragraph");
        assert_eq!(
            serde_json::to_value(&nodes).unwrap(),
            json!([
                {"tag": "p", "children": ["first line", {"tag": "br"}, "second line"]},
                {"tag": "p", "children": ["next paragraph"]},
            ])
        );
    }

    #[test]
    fn test_headings_and_code() {
        let nodes = to_nodes("# Title\ntext\n```rust\nfn main() {}\n\n// end\n```\n#### Small");
        assert_eq!(
            nodes,
            vec![
                Node::element("h3", vec![Node::Text("Title".into())]),
                Node::element("p", vec![Node::Text("text".into())]),
                Node::element("pre", vec![Node::Text("fn main() {}\n\n// end".into())]),
                Node::element("h4", vec![Node::Text("Small".into())]),
            ]
        );
    }

    #[test]
    fn test_unclosed_code_and_hashtags() {
        let nodes = to_nodes("#tag stays text\n```\nopen");
        assert_eq!(
            nodes,
            vec![
                Node::element("p", vec![Node::Text("#tag stays text".into())]),
                Node::element("pre", vec![Node::Text("open".into())]),
            ]
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = TelegraphConfig::default();
        assert!(TelegraphPublisher::from_config(&config).is_some());
        config.enabled = false;
        assert!(TelegraphPublisher::from_config(&config).is_none());
    }
}
