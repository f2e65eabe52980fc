//! Hold types: decision snapshots, optional wealth payloads, resolutions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cid::{self, Cid};
use crate::error::{LatticeError, LatticeResult};

/// Optional introspection payloads attached to a hold point. A fixed set of
/// opaque fields, not an open-ended bag; unset fields are omitted from
/// serialization and therefore from the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wealth {
    /// Scalar value estimate for the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latent: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logits: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_prediction: Option<Value>,
    /// Projected outcome per action label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imagination: Option<BTreeMap<String, Value>>,
    /// Free-form reasoning trace lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Vec<String>>,
}

/// Lifecycle of a hold. Every hold ends in exactly one terminal state.
///
/// ```text
/// Created -> Notified -> Resolved | TimedOut | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Created,
    Notified,
    Resolved,
    TimedOut,
    Cancelled,
}

impl HoldState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HoldState::Resolved | HoldState::TimedOut | HoldState::Cancelled
        )
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }
}

/// Immutable decision snapshot a producer pauses on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldPoint {
    pub hold_id: String,
    /// Producing pipeline or model id.
    pub source_id: String,
    /// Action label to probability. Non-empty; every value in [0, 1].
    pub action_probs: BTreeMap<String, f64>,
    /// Argmax label; ties break toward the lexically lowest label.
    pub chosen: String,
    pub created_at: DateTime<Utc>,
    pub state: HoldState,
    /// Content address of the snapshot (all fields except `fingerprint`
    /// and the mutable `state`).
    pub fingerprint: Cid,
    pub wealth: Wealth,
}

impl HoldPoint {
    /// Validate the probabilities and build a fingerprinted snapshot in the
    /// `Created` state.
    pub fn new(
        source_id: impl Into<String>,
        action_probs: BTreeMap<String, f64>,
        wealth: Wealth,
    ) -> LatticeResult<Self> {
        if action_probs.is_empty() {
            return Err(LatticeError::Validation(
                "action_probs must not be empty".to_string(),
            ));
        }
        for (label, &prob) in &action_probs {
            if !prob.is_finite() || !(0.0..=1.0).contains(&prob) {
                return Err(LatticeError::Validation(format!(
                    "probability for action '{}' out of range: {}",
                    label, prob
                )));
            }
        }

        let chosen = argmax_label(&action_probs)
            .ok_or_else(|| LatticeError::Validation("action_probs must not be empty".to_string()))?
            .to_string();

        let mut hold = HoldPoint {
            hold_id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            action_probs,
            chosen,
            created_at: Utc::now(),
            state: HoldState::Created,
            fingerprint: String::new(),
            wealth,
        };
        hold.fingerprint = hold.compute_fingerprint()?;
        Ok(hold)
    }

    /// Whether `action` is one of the labels this hold offered.
    pub fn offers(&self, action: &str) -> bool {
        self.action_probs.contains_key(action)
    }

    /// Content address over the canonical serialization of the snapshot,
    /// excluding `fingerprint` itself and the mutable `state` field.
    pub fn compute_fingerprint(&self) -> LatticeResult<Cid> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("fingerprint");
            map.remove("state");
        }
        Ok(cid::content_hash(&value))
    }
}

/// Argmax over a label-to-probability map. BTreeMap iteration is ascending
/// by label, so keeping the first strictly-greatest entry breaks ties toward
/// the lexically lowest label.
pub(crate) fn argmax_label(probs: &BTreeMap<String, f64>) -> Option<&str> {
    let mut best: Option<(&str, f64)> = None;
    for (label, &prob) in probs {
        match best {
            Some((_, best_prob)) if prob <= best_prob => {}
            _ => best = Some((label, prob)),
        }
    }
    best.map(|(label, _)| label)
}

/// How a hold reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Resolver confirmed the model's own top choice.
    Accept,
    /// Resolver substituted a different offered label.
    Override,
    /// Deadline passed; the top choice was accepted automatically.
    TimeoutAutoAccept,
    /// Hold abandoned by an explicit cancel or by shutdown.
    Cancelled,
}

/// Terminal outcome of a hold, recorded as the `hold-close` receipt payload
/// and returned to the blocked producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub hold_id: String,
    pub kind: ResolutionKind,
    /// Label the pipeline should proceed with. `None` only for `Cancelled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Who resolved. `None` for `TimeoutAutoAccept` and `Cancelled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver_id: Option<String>,
    pub resolved_at: DateTime<Utc>,
    /// Milliseconds between hold creation and resolution.
    pub hold_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Resolution {
    pub fn was_override(&self) -> bool {
        self.kind == ResolutionKind::Override
    }

    /// True for `Accept` and `TimeoutAutoAccept`: the pipeline proceeds with
    /// the model's own choice.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.kind,
            ResolutionKind::Accept | ResolutionKind::TimeoutAutoAccept
        )
    }

    pub(crate) fn resolved(
        hold: &HoldPoint,
        kind: ResolutionKind,
        action: String,
        resolver_id: String,
    ) -> Self {
        Self::terminal(hold, kind, Some(action), Some(resolver_id), None)
    }

    pub(crate) fn timed_out(hold: &HoldPoint) -> Self {
        Self::terminal(
            hold,
            ResolutionKind::TimeoutAutoAccept,
            Some(hold.chosen.clone()),
            None,
            None,
        )
    }

    pub(crate) fn cancelled(hold: &HoldPoint, notes: Option<String>) -> Self {
        Self::terminal(hold, ResolutionKind::Cancelled, None, None, notes)
    }

    fn terminal(
        hold: &HoldPoint,
        kind: ResolutionKind,
        action: Option<String>,
        resolver_id: Option<String>,
        notes: Option<String>,
    ) -> Self {
        let resolved_at = Utc::now();
        let hold_duration_ms = (resolved_at - hold.created_at).num_milliseconds().max(0) as u64;
        Resolution {
            hold_id: hold.hold_id.clone(),
            kind,
            action,
            resolver_id,
            resolved_at,
            hold_duration_ms,
            notes,
        }
    }
}

/// Callback interface for hold observers. Notified in registration order;
/// the open notification is the required contract, the resolved hook has a
/// default empty body for write-only observers.
#[async_trait::async_trait]
pub trait HoldListener: Send + Sync {
    async fn on_hold_opened(&self, hold: &HoldPoint);

    async fn on_hold_resolved(&self, _resolution: &Resolution) {}
}
