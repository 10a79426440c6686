use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use crate::error::{AdapterError, AdapterErrorKind};

/// Reads Chromium's stderr until it announces the DevTools websocket endpoint.
pub(crate) async fn extract_ws_url(
    child: &mut Child,
    wait: Duration,
) -> Result<String, AdapterError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::LaunchFailed)
            .with_hint("chromium process missing stderr handle")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                AdapterError::new(AdapterErrorKind::LaunchFailed).with_hint(err.to_string())
            })?;
            if let Some(ws) = parse_devtools_line(&line) {
                return Ok(ws);
            }
            captured.push(line);
        }
        Err(AdapterError::new(AdapterErrorKind::LaunchFailed).with_hint(format!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            captured
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        )))
    };

    timeout(wait, reader).await.map_err(|_| {
        AdapterError::new(AdapterErrorKind::LaunchFailed)
            .with_hint("timed out waiting for chromium devtools websocket url")
            .retriable(true)
    })?
}

fn parse_devtools_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_devtools_line;

    #[test]
    fn parses_devtools_banner() {
        let line = "DevTools listening on ws://127.0.0.1:39541/devtools/browser/5d0c-aa";
        assert_eq!(
            parse_devtools_line(line).as_deref(),
            Some("ws://127.0.0.1:39541/devtools/browser/5d0c-aa")
        );
        assert!(parse_devtools_line("[1019/101010.1:ERROR:gpu_init.cc] failed").is_none());
    }
}
