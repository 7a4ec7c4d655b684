use crate::core::error::{MatchingError, Result};
use crate::models::{ConsentResponse, ConsentSide, EventScope, PairId, ParticipantId};
use crate::services::{MatchStore, PoolFilter, StoreError};
use std::sync::Arc;

/// Only pairings from this round collect consent
pub const CONSENT_ROUND: u32 = 1;

/// Mutual-match value derived from both votes
///
/// `None` until both sides have answered, then `Some(a && b)`. Never
/// decided from a single side.
#[inline]
pub fn derive_mutual(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a && b),
        _ => None,
    }
}

/// Records each side's yes/no on a round 1 pairing and reveals contact
/// details only when both said yes
#[derive(Clone)]
pub struct ConsentProtocol {
    store: Arc<dyn MatchStore>,
}

impl ConsentProtocol {
    pub fn new(store: Arc<dyn MatchStore>) -> Self {
        Self { store }
    }

    /// Submit a vote on behalf of a participant, resolving their side
    pub async fn submit_for_participant(
        &self,
        scope: &EventScope,
        pair_id: PairId,
        participant: ParticipantId,
        wants_match: bool,
    ) -> Result<ConsentResponse> {
        let record = self
            .store
            .get_record(scope, pair_id)
            .await?
            .ok_or(MatchingError::UnknownPair(pair_id))?;

        let side = record.side_of(participant).ok_or(MatchingError::NotInPair {
            pair_id,
            participant,
        })?;

        self.submit_consent(scope, pair_id, side, wants_match).await
    }

    /// Set one side's vote
    ///
    /// The write touches only that side's flag, so the partner's vote can
    /// land concurrently without being lost. Resubmitting overwrites the
    /// submitter's own previous answer.
    pub async fn submit_consent(
        &self,
        scope: &EventScope,
        pair_id: PairId,
        side: ConsentSide,
        wants_match: bool,
    ) -> Result<ConsentResponse> {
        let existing = self
            .store
            .get_record(scope, pair_id)
            .await?
            .ok_or(MatchingError::UnknownPair(pair_id))?;

        if existing.round != CONSENT_ROUND {
            return Err(MatchingError::ConsentClosed(existing.round));
        }
        if existing.is_unmatched() {
            return Err(MatchingError::NoPartner(pair_id));
        }

        let record = self
            .store
            .set_consent(scope, pair_id, side, wants_match)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => MatchingError::UnknownPair(pair_id),
                other => MatchingError::Store(other),
            })?;

        let mutual_match = record.mutual_match();
        tracing::info!(
            "Consent for pairing {} side {:?}: {} (mutual: {:?})",
            pair_id,
            side,
            wants_match,
            mutual_match
        );

        let partner_contact = if mutual_match == Some(true) {
            match record.partner_of(side) {
                Some(partner) => self
                    .store
                    .get_profiles(scope, &PoolFilter::Ids(vec![partner]))
                    .await?
                    .into_iter()
                    .find(|p| p.id == partner)
                    .map(|p| p.contact),
                None => None,
            }
        } else {
            None
        };

        Ok(ConsentResponse {
            pair_id,
            side,
            wants_match,
            mutual_match,
            partner_contact,
        })
    }
}
