use crate::models::{Gender, Participant};

/// Check if a participant may enter the round 1 pool
///
/// The survey must be submitted and at least one scored dimension answered.
#[inline]
pub fn has_complete_survey(participant: &Participant) -> bool {
    if !participant.survey_complete {
        return false;
    }

    let profile = &participant.profile;
    profile.personality.is_some()
        || profile.attachment.is_some()
        || profile.communication.is_some()
        || profile.lifestyle.social_pace.is_some()
        || profile.lifestyle.chronotype.is_some()
        || profile.lifestyle.activity.is_some()
        || !profile.core_values.is_empty()
        || !profile.vibe.is_empty()
}

/// Whether `seeker` is open to meeting someone of `gender`
///
/// An empty preference list is open to everyone; an unknown gender only
/// fits an open preference list.
#[inline]
fn is_open_to(seeker: &Participant, gender: Option<Gender>) -> bool {
    if seeker.open_to.is_empty() {
        return true;
    }

    match gender {
        Some(g) => seeker.open_to.contains(&g),
        None => false,
    }
}

/// Check that both participants are open to each other
#[inline]
pub fn mutually_compatible(a: &Participant, b: &Participant) -> bool {
    a.id != b.id && is_open_to(a, b.gender) && is_open_to(b, a.gender)
}
