//! Node filesystem prober - observes current state without mutating it

use crate::error::NodeError;
use crate::node::{FileKind, NodeFs};
use crate::types::{DirectorySpec, Drift};

/// What a probe found for one directory on one node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservedState {
    pub exists: bool,
    /// Attributes that differ from the desired directory; empty when everything matches
    pub drift: Vec<Drift>,
    pub error: Option<NodeError>,
}

impl ObservedState {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(drift: Vec<Drift>) -> Self {
        Self {
            exists: true,
            drift,
            error: None,
        }
    }

    pub fn failed(error: NodeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// True when the directory exists and nothing needs repair
    pub fn attributes_match(&self) -> bool {
        self.exists && self.error.is_none() && self.drift.is_empty()
    }

    /// True when some drift cannot be fixed by chown/chmod/relabel
    pub fn is_blocked(&self) -> bool {
        self.drift.iter().any(|d| d.attribute().is_none())
    }
}

/// Probe one directory; errors are captured, never propagated
pub fn probe(fs: &dyn NodeFs, spec: &DirectorySpec) -> ObservedState {
    match observe(fs, spec) {
        Ok(state) => state,
        Err(e) => {
            log::debug!("probe of {} failed: {}", spec.path.display(), e);
            ObservedState::failed(e)
        }
    }
}

/// Probe one directory, propagating node errors
pub(crate) fn observe(fs: &dyn NodeFs, spec: &DirectorySpec) -> Result<ObservedState, NodeError> {
    let Some(stat) = fs.stat(&spec.path)? else {
        return Ok(ObservedState::absent());
    };

    if let FileKind::Other(kind) = stat.kind {
        return Ok(ObservedState::present(vec![Drift::NotADirectory { kind }]));
    }

    let mut drift = Vec::new();

    if !principal_matches(&spec.owner, &stat.owner, stat.uid) {
        drift.push(Drift::Owner {
            actual: stat.owner.clone(),
            desired: spec.owner.clone(),
        });
    }
    if !principal_matches(&spec.group, &stat.group, stat.gid) {
        drift.push(Drift::Group {
            actual: stat.group.clone(),
            desired: spec.group.clone(),
        });
    }
    if stat.mode != spec.mode {
        drift.push(Drift::Mode {
            actual: stat.mode,
            desired: spec.mode,
        });
    }

    if let Some(label) = &spec.security_label {
        match fs.security_context(&spec.path)? {
            Some(context) if !label_matches(label, &context) => {
                drift.push(Drift::SecurityLabel {
                    actual: Some(context),
                    desired: label.clone(),
                });
            }
            Some(_) => {}
            None => log::debug!(
                "no security context reported for {}, skipping label check",
                spec.path.display()
            ),
        }
    }

    Ok(ObservedState::present(drift))
}

/// Numeric desired values compare against ids, names against names
fn principal_matches(desired: &str, actual_name: &str, actual_id: u32) -> bool {
    match desired.parse::<u32>() {
        Ok(id) => id == actual_id,
        Err(_) => desired == actual_name,
    }
}

/// Compare a desired label against an observed SELinux context
///
/// A label containing ':' is a full context and must match exactly;
/// otherwise only the type component (`user:role:type:level`) is compared.
pub fn label_matches(desired: &str, context: &str) -> bool {
    if desired.contains(':') {
        return desired == context;
    }
    context.split(':').nth(2) == Some(desired)
}
