use std::collections::BTreeMap;

use thiserror::Error;

/// Prefix applied to labels copied from the backend, so they never collide
/// with final scrape labels.
pub const META_LABEL_PREFIX: &str = "__meta_";

const NAME_LABEL: &str = "__name__";

/// The ordered sequence of target groups emitted on one refresh cycle:
/// alive groups first, then tombstones for identities that disappeared.
pub type RefreshBatch = Vec<TargetGroup>;

#[derive(Debug, Error, PartialEq)]
pub enum ConvertError {
    #[error("record has no '{0}' label")]
    MissingLabel(&'static str),
}

/// A named batch of targets sharing a source identity, the unit of
/// add/remove in discovery updates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetGroup {
    /// Stable identity key used for diffing across refresh cycles.
    pub source: String,
    pub labels: BTreeMap<String, String>,
    pub targets: Vec<String>,
}

impl TargetGroup {
    /// A group with an empty target list, signaling that a previously
    /// reported source has disappeared.
    pub fn tombstone(source: String) -> TargetGroup {
        TargetGroup {
            source,
            ..Default::default()
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Convert one metric record into a target group.
///
/// The identity is the host part of `instance` joined with `exporter_port`,
/// and doubles as the group's single target address. `__name__` is copied
/// verbatim, every other label is namespaced with [`META_LABEL_PREFIX`].
pub fn build_group(metric: &BTreeMap<String, String>) -> Result<TargetGroup, ConvertError> {
    let instance = metric
        .get("instance")
        .ok_or(ConvertError::MissingLabel("instance"))?;
    let port = metric
        .get("exporter_port")
        .ok_or(ConvertError::MissingLabel("exporter_port"))?;

    let host = match instance.split_once(':') {
        Some((host, _scrape_port)) => host,
        None => instance.as_str(),
    };
    let address = format!("{host}:{port}");

    let mut labels = BTreeMap::new();
    for (key, value) in metric {
        if key == NAME_LABEL {
            labels.insert(key.clone(), value.clone());
        } else {
            labels.insert(format!("{META_LABEL_PREFIX}{key}"), value.clone());
        }
    }

    Ok(TargetGroup {
        source: address.clone(),
        labels,
        targets: vec![address],
    })
}
