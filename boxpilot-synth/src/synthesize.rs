//! Subscription → kernel configuration merge.
//!
//! Steps:
//!
//! 1. Decode the subscription and a fresh copy of the template.
//! 2. Keep candidates with a server address, in source order; a tag that
//!    already names an outbound is skipped (first occurrence wins).
//! 3. Append survivors to the outbound list and to both routing groups.
//! 4. Apply mode-specific inbound filtering.
//! 5. Drop disabled TLS blocks, verify group references, serialize.

use std::collections::HashSet;

use boxpilot_core::ProxyMode;

use crate::error::SynthError;
use crate::model::{KernelConfig, SubscriptionDocument};
use crate::template::{decode_template, Template, AUTO_SELECT_INDEX, MANUAL_SELECT_INDEX};

/// Knobs that vary between applies of the same template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthOptions {
    /// `Some(System)` drops `tun` inbounds; `Some(Tun)` or `None` keeps the
    /// template's inbounds unchanged.
    pub mode: Option<ProxyMode>,
}

impl SynthOptions {
    pub fn for_mode(mode: ProxyMode) -> Self {
        Self { mode: Some(mode) }
    }
}

/// Finished configuration plus what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub document: Vec<u8>,
    /// Tags of the appended endpoints, in order.
    pub appended: Vec<String>,
    /// Candidates excluded for a missing server, missing tag, or duplicate tag.
    pub skipped: usize,
}

/// Merge `subscription` into `template` with default options.
pub fn synthesize(template: &[u8], subscription: &[u8]) -> Result<Synthesis, SynthError> {
    synthesize_with(template, subscription, &SynthOptions::default())
}

pub fn synthesize_with(
    template: &[u8],
    subscription: &[u8],
    options: &SynthOptions,
) -> Result<Synthesis, SynthError> {
    let subscription = decode_subscription(subscription)?;
    let config = decode_template(template)?;
    merge(config, subscription, options)
}

impl Template {
    /// Merge `subscription` into a copy of this template.
    pub fn synthesize(
        &self,
        subscription: &[u8],
        options: &SynthOptions,
    ) -> Result<Synthesis, SynthError> {
        let subscription = decode_subscription(subscription)?;
        merge(self.config().clone(), subscription, options)
    }
}

fn decode_subscription(raw: &[u8]) -> Result<SubscriptionDocument, SynthError> {
    serde_json::from_slice(raw).map_err(|source| SynthError::Decode {
        document: "subscription",
        source,
    })
}

fn merge(
    mut config: KernelConfig,
    subscription: SubscriptionDocument,
    options: &SynthOptions,
) -> Result<Synthesis, SynthError> {
    let mut known: HashSet<String> = config.outbounds.iter().map(|o| o.tag.clone()).collect();
    let mut appended = Vec::new();
    let mut skipped = 0usize;

    for endpoint in subscription.outbounds {
        if !endpoint.has_server() || endpoint.tag.is_empty() {
            skipped += 1;
            continue;
        }
        if !known.insert(endpoint.tag.clone()) {
            tracing::debug!(tag = %endpoint.tag, "skipping duplicate endpoint tag");
            skipped += 1;
            continue;
        }
        appended.push(endpoint.tag.clone());
        config.outbounds.push(endpoint);
    }

    for index in [AUTO_SELECT_INDEX, MANUAL_SELECT_INDEX] {
        if let Some(members) = config.outbounds[index].outbounds.as_mut() {
            members.extend(appended.iter().cloned());
        }
    }

    if options.mode == Some(ProxyMode::System) {
        config.inbounds.retain(|inbound| inbound.kind != "tun");
    }

    for outbound in &mut config.outbounds {
        outbound.normalize_tls();
    }

    check_references(&config)?;

    let document = serde_json::to_vec_pretty(&config).map_err(|source| SynthError::Decode {
        document: "synthesized config",
        source,
    })?;

    tracing::info!(
        appended = appended.len(),
        skipped,
        outbounds = config.outbounds.len(),
        "synthesized kernel config",
    );

    Ok(Synthesis {
        document,
        appended,
        skipped,
    })
}

/// Every member of every routing group must be an outbound tag.
fn check_references(config: &KernelConfig) -> Result<(), SynthError> {
    let tags: HashSet<&str> = config.outbounds.iter().map(|o| o.tag.as_str()).collect();
    for group in config.outbounds.iter().filter(|o| o.is_group()) {
        for member in group.outbounds.iter().flatten() {
            if !tags.contains(member.as_str()) {
                return Err(SynthError::DanglingReference {
                    group: group.tag.clone(),
                    tag: member.clone(),
                });
            }
        }
    }
    Ok(())
}
