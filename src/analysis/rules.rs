//! Per-meeting-type speaker-count rules.

use crate::models::MeetingType;

/// Count rules selected by the inferred meeting type
pub trait MeetingRules: Send + Sync {
    fn meeting_type(&self) -> MeetingType;

    /// Distinct identities a finalized mapping may hold
    fn max_identities(&self, label_count: usize) -> usize;

    /// Label count the meeting type implies, if any
    fn expected_speakers(&self) -> Option<usize>;

    /// Guidance line for the resolver prompt
    fn guidance(&self) -> &'static str;
}

pub struct OneOnOneRules;

impl MeetingRules for OneOnOneRules {
    fn meeting_type(&self) -> MeetingType {
        MeetingType::OneOnOne
    }

    fn max_identities(&self, _label_count: usize) -> usize {
        2
    }

    fn expected_speakers(&self) -> Option<usize> {
        Some(2)
    }

    fn guidance(&self) -> &'static str {
        "This is a one-on-one meeting: exactly two people speak. Assign at most two distinct names."
    }
}

pub struct GroupRules;

impl MeetingRules for GroupRules {
    fn meeting_type(&self) -> MeetingType {
        MeetingType::Group
    }

    fn max_identities(&self, label_count: usize) -> usize {
        label_count
    }

    fn expected_speakers(&self) -> Option<usize> {
        None
    }

    fn guidance(&self) -> &'static str {
        "This is a group meeting. Each speaker label is a different person."
    }
}

pub struct UnknownRules;

impl MeetingRules for UnknownRules {
    fn meeting_type(&self) -> MeetingType {
        MeetingType::Unknown
    }

    fn max_identities(&self, label_count: usize) -> usize {
        label_count
    }

    fn expected_speakers(&self) -> Option<usize> {
        None
    }

    fn guidance(&self) -> &'static str {
        "The meeting format is unknown. Each speaker label is a different person."
    }
}

pub fn rules_for(meeting_type: MeetingType) -> &'static dyn MeetingRules {
    match meeting_type {
        MeetingType::OneOnOne => &OneOnOneRules,
        MeetingType::Group => &GroupRules,
        MeetingType::Unknown => &UnknownRules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_dispatch() {
        for t in [MeetingType::OneOnOne, MeetingType::Group, MeetingType::Unknown] {
            assert_eq!(rules_for(t).meeting_type(), t);
        }
        assert_eq!(rules_for(MeetingType::OneOnOne).max_identities(5), 2);
        assert_eq!(rules_for(MeetingType::Group).max_identities(5), 5);
        assert_eq!(rules_for(MeetingType::Unknown).expected_speakers(), None);
    }
}
