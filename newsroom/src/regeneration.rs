use std::collections::BTreeMap;

use tracing::info;

use crate::review::AggregatedVerdict;
use crate::types::{Aspect, ContentUnit, GenerationRequest};

/// How much of a unit the next attempt has to redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationScope {
    /// Every aspect was rejected; nothing is preserved.
    Full,
    /// Only the rejected aspects change, the rest is carried over.
    Targeted,
}

impl RegenerationScope {
    pub fn of(request: &GenerationRequest) -> Self {
        if request.preserve.is_empty() {
            RegenerationScope::Full
        } else {
            RegenerationScope::Targeted
        }
    }
}

/// Build the input of the next attempt from a rejected unit.
///
/// Accepted aspects are pinned to the values just produced, every rejected
/// aspect carries exactly the feedback it was rejected with. Instructions,
/// source text and target are carried over unchanged.
pub fn plan_next_attempt(
    previous: &GenerationRequest,
    rejected: &ContentUnit,
    verdict: &AggregatedVerdict,
) -> GenerationRequest {
    let kind = rejected.kind();

    let revise: BTreeMap<Aspect, String> = kind
        .aspects()
        .iter()
        .filter_map(|aspect| verdict.feedback.get(aspect).map(|fb| (*aspect, fb.clone())))
        .collect();

    let preserve: BTreeMap<Aspect, String> = kind
        .aspects()
        .iter()
        .filter(|aspect| !revise.contains_key(aspect))
        .filter_map(|aspect| rejected.aspect_value(*aspect).map(|value| (*aspect, value.to_string())))
        .collect();

    let next = GenerationRequest {
        preserve,
        revise,
        ..previous.clone()
    };

    let scope = RegenerationScope::of(&next);
    info!(
        "Planned {:?} regeneration of {}: revise={:?} preserve={:?}",
        scope,
        kind,
        next.revise.keys().map(|a| a.as_str()).collect::<Vec<_>>(),
        next.preserve.keys().map(|a| a.as_str()).collect::<Vec<_>>()
    );
    next
}
