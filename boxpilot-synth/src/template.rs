//! Routing template: embedded at compile time, optionally replaced by an
//! operator-supplied file.

use std::path::Path;

use crate::error::SynthError;
use crate::model::KernelConfig;

/// Default kernel configuration shape, baked into the binary.
pub const DEFAULT_TEMPLATE: &str = include_str!("templates/kernel.json");

/// Structural positions of the two routing groups in the template's
/// outbound list.
pub const AUTO_SELECT_INDEX: usize = 0;
pub const MANUAL_SELECT_INDEX: usize = 1;

/// A validated routing template.
///
/// Holds the raw bytes; every synthesis decodes a fresh copy so the template
/// itself is never mutated.
#[derive(Debug, Clone)]
pub struct Template {
    raw: Vec<u8>,
    parsed: KernelConfig,
}

impl Template {
    /// The embedded default template.
    pub fn embedded() -> Result<Self, SynthError> {
        Self::from_bytes(DEFAULT_TEMPLATE.as_bytes().to_vec())
    }

    /// Load `path` when given, otherwise fall back to the embedded template.
    pub fn load(path: Option<&Path>) -> Result<Self, SynthError> {
        match path {
            Some(path) => {
                let raw = std::fs::read(path).map_err(|e| {
                    SynthError::Template(format!("cannot read {}: {e}", path.display()))
                })?;
                tracing::debug!(path = %path.display(), "using operator template");
                Self::from_bytes(raw)
            }
            None => Self::embedded(),
        }
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, SynthError> {
        let parsed = decode_template(&raw)?;
        Ok(Self { raw, parsed })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Read-only view of the decoded template (addresses, inbounds, ...).
    pub fn config(&self) -> &KernelConfig {
        &self.parsed
    }
}

/// Decode template bytes and check that the routing groups sit at their
/// structural positions.
pub(crate) fn decode_template(raw: &[u8]) -> Result<KernelConfig, SynthError> {
    let config: KernelConfig = serde_json::from_slice(raw).map_err(|source| SynthError::Decode {
        document: "template",
        source,
    })?;
    for index in [AUTO_SELECT_INDEX, MANUAL_SELECT_INDEX] {
        match config.outbounds.get(index) {
            Some(outbound) if outbound.is_group() => {}
            Some(outbound) => {
                return Err(SynthError::Template(format!(
                    "outbound #{index} ('{}') is not a routing group",
                    outbound.tag
                )))
            }
            None => {
                return Err(SynthError::Template(format!(
                    "missing routing group at outbound #{index}"
                )))
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_template_is_valid() {
        let template = Template::embedded().expect("embedded template");
        let config = template.config();
        assert_eq!(config.outbounds[AUTO_SELECT_INDEX].tag, "auto");
        assert_eq!(config.outbounds[MANUAL_SELECT_INDEX].tag, "select");
        assert_eq!(config.controller_addr(), Some("127.0.0.1:9090"));
        assert_eq!(
            config.proxy_listen(),
            Some("127.0.0.1:2080".parse().expect("addr"))
        );
    }

    #[test]
    fn template_without_groups_is_rejected() {
        let err = Template::from_bytes(br#"{"outbounds":[{"type":"direct","tag":"direct"}]}"#.to_vec())
            .unwrap_err();
        assert!(matches!(err, SynthError::Template(_)), "got: {err}");
        assert!(err.is_decode());
    }

    #[test]
    fn missing_template_file_is_reported() {
        let err = Template::load(Some(Path::new("/nonexistent/boxpilot/template.json"))).unwrap_err();
        assert!(err.to_string().contains("template.json"), "got: {err}");
    }
}
