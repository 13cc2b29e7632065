//! Response envelope shared by the Bot API and Telegraph.

use serde::Deserialize;

/// `{ "ok": bool, "result": T }` on success, a description on failure.
///
/// The Bot API names the failure text `description`, Telegraph `error`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default, alias = "error")]
    description: Option<String>,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Result<T, String> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err("response carried no result".into()),
            (false, _) => Err(self
                .description
                .unwrap_or_else(|| "unknown error".into())),
        }
    }
}
