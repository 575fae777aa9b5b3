//! Fetch → synthesize → persist.

use std::path::Path;
use std::time::Duration;

use crate::error::SynthError;
use crate::synthesize::{SynthOptions, Synthesis};
use crate::template::Template;
use crate::writer::atomic_write;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain GET of a subscription document.
pub async fn fetch_subscription(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, SynthError> {
    let fetch_err = |source| SynthError::Fetch {
        url: url.to_string(),
        source,
    };

    tracing::debug!(url, "fetching subscription");
    let response = http
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(fetch_err)?;

    let status = response.status();
    if !status.is_success() {
        return Err(SynthError::FetchStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(fetch_err)?;
    Ok(body.to_vec())
}

/// Synthesize and write the kernel config. The write is the last step; on
/// any earlier failure `dest` is left untouched.
pub fn apply(
    template: &Template,
    subscription: &[u8],
    dest: &Path,
    options: &SynthOptions,
) -> Result<Synthesis, SynthError> {
    let synthesis = template.synthesize(subscription, options)?;
    atomic_write(dest, &synthesis.document)?;
    Ok(synthesis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn apply_leaves_destination_untouched_on_decode_failure() {
        let dir = TempDir::new().expect("tempdir");
        let dest = dir.path().join("config.json");
        std::fs::write(&dest, b"previous").expect("seed");

        let template = Template::embedded().expect("template");
        let err = apply(&template, b"{not json", &dest, &SynthOptions::default()).unwrap_err();

        assert!(err.is_decode(), "got: {err}");
        assert_eq!(std::fs::read(&dest).expect("read"), b"previous");
    }

    #[tokio::test]
    async fn fetch_from_closed_port_is_a_fetch_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let http = reqwest::Client::new();
        let err = fetch_subscription(&http, &format!("http://{addr}/sub"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthError::Fetch { .. }), "got: {err}");
    }
}
