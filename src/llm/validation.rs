use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::analysis::{is_placeholder_name, rules_for};
use crate::config::ValidationConfig;
use crate::models::{MeetingContext, NoteKind, ResolutionPass, SpeakerResolution, ValidationNote};

/// Validated mapping plus the corrections that produced it
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// label → name; labels absent are unresolved
    pub mappings: BTreeMap<String, String>,
    pub ambiguous: BTreeSet<String>,
    pub notes: Vec<ValidationNote>,
    /// Labels with no name or a placeholder name
    pub unresolved: Vec<String>,
    /// Whether a refinement call is warranted
    pub refine: bool,
}

impl ValidationOutcome {
    /// Problems to hand back to the resolver on refinement
    pub fn issues(&self) -> Vec<String> {
        let mut issues: Vec<String> = self.notes.iter().map(|n| n.message.clone()).collect();
        for label in &self.unresolved {
            issues.push(format!("{} was left unresolved", label));
        }
        issues
    }
}

/// Deterministic post-processing of a resolver response
#[derive(Debug, Clone, Default)]
pub struct SpeakerValidator {
    config: ValidationConfig,
}

impl SpeakerValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Audit `resolution` against the artifact's labels and the meeting
    /// context. `volumes` is the text volume per label.
    pub fn validate(
        &self,
        resolution: &SpeakerResolution,
        labels: &[String],
        volumes: &BTreeMap<String, usize>,
        context: &MeetingContext,
        pass: ResolutionPass,
    ) -> ValidationOutcome {
        let mut notes = Vec::new();
        let note = |kind: NoteKind, message: String| ValidationNote::new(pass, kind, message);

        // Intake: one name per known label
        let mut mappings: BTreeMap<String, String> = BTreeMap::new();
        let mut alternatives: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for proposal in &resolution.proposals {
            let name = proposal.name.trim();
            if !labels.contains(&proposal.label) {
                notes.push(
                    note(
                        NoteKind::UnknownLabel,
                        format!(
                            "Discarded \"{}\": {} is not a diarization label",
                            name, proposal.label
                        ),
                    )
                    .with_label(&proposal.label)
                    .with_name(name),
                );
                continue;
            }
            if name.is_empty() {
                notes.push(
                    note(NoteKind::EmptyName, format!("Empty name for {}", proposal.label))
                        .with_label(&proposal.label),
                );
                continue;
            }
            if let Some(existing) = mappings.get(&proposal.label) {
                notes.push(
                    note(
                        NoteKind::DuplicateLabel,
                        format!(
                            "{} already mapped to \"{}\"; \"{}\" kept as an alternative",
                            proposal.label, existing, name
                        ),
                    )
                    .with_label(&proposal.label)
                    .with_name(name),
                );
                alternatives
                    .entry(proposal.label.clone())
                    .or_default()
                    .push(name.to_string());
                continue;
            }
            mappings.insert(proposal.label.clone(), name.to_string());
            alternatives
                .entry(proposal.label.clone())
                .or_default()
                .extend(proposal.alternatives.iter().cloned());
        }

        let discarded = enforce_count(&mut mappings, labels, volumes, context, &mut notes, pass);
        filter_mentioned(&mut mappings, &alternatives, context, &mut notes, pass);
        let ambiguous = find_ambiguous(&mappings, &mut notes, pass);

        let unresolved: Vec<String> = labels
            .iter()
            .filter(|l| mappings.get(*l).is_none_or(|n| is_placeholder_name(n, l)))
            .cloned()
            .collect();

        let refine = !labels.is_empty()
            && (discarded
                || unresolved.len() as f64 / labels.len() as f64
                    > self.config.refine_unresolved_ratio
                || (labels.len() <= self.config.small_meeting_max_speakers
                    && !unresolved.is_empty()));

        for n in &notes {
            info!("Correction [{:?}]: {}", n.kind, n.message);
        }
        debug!(
            "Validated {} mapping(s), {} unresolved, refine={}",
            mappings.len(),
            unresolved.len(),
            refine
        );

        ValidationOutcome {
            mappings,
            ambiguous,
            notes,
            unresolved,
            refine,
        }
    }
}

/// Keep the highest-ranked identities the meeting type allows; returns
/// whether anything was dropped
fn enforce_count(
    mappings: &mut BTreeMap<String, String>,
    labels: &[String],
    volumes: &BTreeMap<String, usize>,
    context: &MeetingContext,
    notes: &mut Vec<ValidationNote>,
    pass: ResolutionPass,
) -> bool {
    let rules = rules_for(context.inferred_type);
    let limit = rules.max_identities(labels.len());

    // identity (lowercased name) → labels carrying it
    let mut identities: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (label, name) in mappings.iter() {
        if !is_placeholder_name(name, label) {
            identities
                .entry(name.to_lowercase())
                .or_default()
                .push(label.clone());
        }
    }
    if identities.len() <= limit {
        return false;
    }

    let mut ranked: Vec<(bool, usize, String)> = identities
        .iter()
        .map(|(identity, carriers)| {
            let volume: usize = carriers.iter().filter_map(|l| volumes.get(l)).sum();
            (context.is_self_introduced(identity), volume, identity.clone())
        })
        .collect();
    // Self-introduced first, then more text, then name for determinism
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));

    for (_, _, identity) in ranked.into_iter().skip(limit) {
        for label in &identities[&identity] {
            if let Some(name) = mappings.remove(label) {
                notes.push(
                    ValidationNote::new(
                        pass,
                        NoteKind::CountEnforced,
                        format!(
                            "{} meeting allows {} identities; \"{}\" dropped from {}",
                            rules.meeting_type(),
                            limit,
                            name,
                            label
                        ),
                    )
                    .with_label(label)
                    .with_name(name),
                );
            }
        }
    }
    true
}

/// Revert names that were only mentioned, unless nothing else was offered
fn filter_mentioned(
    mappings: &mut BTreeMap<String, String>,
    alternatives: &BTreeMap<String, Vec<String>>,
    context: &MeetingContext,
    notes: &mut Vec<ValidationNote>,
    pass: ResolutionPass,
) {
    let suspects: Vec<(String, String)> = mappings
        .iter()
        .filter(|(label, name)| {
            !is_placeholder_name(name, label)
                && context.is_mentioned_only(name)
                && !context.is_self_introduced(name)
        })
        .map(|(l, n)| (l.clone(), n.clone()))
        .collect();

    for (label, name) in suspects {
        let other_offers = alternatives.get(&label).is_some_and(|a| !a.is_empty());
        let introduced_here = context
            .introductions_for(&label)
            .is_some_and(|names| !names.is_empty());

        if other_offers || introduced_here {
            mappings.remove(&label);
            notes.push(
                ValidationNote::new(
                    pass,
                    NoteKind::MentionedOnlyDiscarded,
                    format!(
                        "\"{}\" is only mentioned in dialogue; {} reverted to unresolved",
                        name, label
                    ),
                )
                .with_label(label)
                .with_name(name),
            );
        } else {
            notes.push(
                ValidationNote::new(
                    pass,
                    NoteKind::MentionedOnlyAccepted,
                    format!(
                        "\"{}\" is only mentioned in dialogue but is the sole candidate for {}",
                        name, label
                    ),
                )
                .with_label(label)
                .with_name(name),
            );
        }
    }
}

/// Labels sharing a resolved name with another label
fn find_ambiguous(
    mappings: &BTreeMap<String, String>,
    notes: &mut Vec<ValidationNote>,
    pass: ResolutionPass,
) -> BTreeSet<String> {
    let mut by_name: BTreeMap<String, Vec<&String>> = BTreeMap::new();
    for (label, name) in mappings {
        if !is_placeholder_name(name, label) {
            by_name.entry(name.to_lowercase()).or_default().push(label);
        }
    }

    let mut ambiguous = BTreeSet::new();
    for carriers in by_name.values().filter(|c| c.len() > 1) {
        let list: Vec<&str> = carriers.iter().map(|l| l.as_str()).collect();
        let name = &mappings[carriers[0]];
        notes.push(
            ValidationNote::new(
                pass,
                NoteKind::Ambiguous,
                format!("Labels {} all resolve to \"{}\"", list.join(", "), name),
            )
            .with_name(name),
        );
        ambiguous.extend(carriers.iter().map(|l| l.to_string()));
    }
    ambiguous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeetingType, SpeakerProposal};

    fn labels(list: &[&str]) -> Vec<String> {
        list.iter().map(|l| l.to_string()).collect()
    }

    fn volumes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(l, v)| (l.to_string(), *v)).collect()
    }

    fn context(meeting_type: MeetingType, intros: &[(&str, &str)], mentioned: &[&str]) -> MeetingContext {
        let mut ctx = MeetingContext {
            inferred_type: meeting_type,
            ..Default::default()
        };
        for (label, name) in intros {
            ctx.self_introductions
                .entry(label.to_string())
                .or_default()
                .insert(name.to_string());
        }
        ctx.mentioned_only_names = mentioned.iter().map(|n| n.to_string()).collect();
        ctx
    }

    fn validate(
        resolution: &SpeakerResolution,
        labels: &[String],
        volumes: &BTreeMap<String, usize>,
        ctx: &MeetingContext,
    ) -> ValidationOutcome {
        SpeakerValidator::default().validate(resolution, labels, volumes, ctx, ResolutionPass::Initial)
    }

    #[test]
    fn test_spurious_label_is_discarded() {
        let resolution =
            SpeakerResolution::from_pairs(&[("L0", "Dana"), ("L1", "Unknown"), ("Sam", "guest")]);
        let ctx = context(MeetingType::OneOnOne, &[("L0", "Dana")], &["Sam"]);

        let outcome = validate(&resolution, &labels(&["L0", "L1"]), &volumes(&[]), &ctx);

        assert_eq!(outcome.mappings.len(), 2);
        assert_eq!(outcome.mappings["L0"], "Dana");
        assert_eq!(outcome.mappings["L1"], "Unknown");
        assert_eq!(outcome.notes.len(), 1);
        assert_eq!(outcome.notes[0].kind, NoteKind::UnknownLabel);
        assert_eq!(outcome.notes[0].label.as_deref(), Some("Sam"));
        assert_eq!(outcome.unresolved, vec!["L1"]);
        assert!(outcome.refine);
    }

    #[test]
    fn test_one_on_one_keeps_two_identities() {
        let resolution =
            SpeakerResolution::from_pairs(&[("L0", "Dana"), ("L1", "Lee"), ("L2", "Sam")]);
        let ctx = context(MeetingType::OneOnOne, &[("L1", "Lee")], &[]);
        let vols = volumes(&[("L0", 900), ("L1", 50), ("L2", 300)]);

        let outcome = validate(&resolution, &labels(&["L0", "L1", "L2"]), &vols, &ctx);

        // Lee (self-introduced) then Dana (most text); Sam dropped
        assert_eq!(outcome.mappings.len(), 2);
        assert_eq!(outcome.mappings["L0"], "Dana");
        assert_eq!(outcome.mappings["L1"], "Lee");
        assert!(!outcome.mappings.contains_key("L2"));
        assert_eq!(outcome.notes[0].kind, NoteKind::CountEnforced);
        assert!(outcome.refine);
    }

    #[test]
    fn test_group_meeting_has_no_count_limit() {
        let resolution =
            SpeakerResolution::from_pairs(&[("L0", "Dana"), ("L1", "Lee"), ("L2", "Sam")]);
        let ctx = context(MeetingType::Group, &[], &[]);

        let outcome = validate(&resolution, &labels(&["L0", "L1", "L2"]), &volumes(&[]), &ctx);
        assert_eq!(outcome.mappings.len(), 3);
        assert!(outcome.notes.is_empty());
        assert!(!outcome.refine);
    }

    #[test]
    fn test_mentioned_name_reverted_when_alternatives_exist() {
        let mut resolution = SpeakerResolution::from_pairs(&[("L0", "Dana")]);
        resolution
            .proposals
            .push(SpeakerProposal::new("L1", "Sam").with_alternatives(&["Lee"]));
        let ctx = context(MeetingType::Group, &[("L0", "Dana")], &["Sam"]);

        let outcome = validate(&resolution, &labels(&["L0", "L1"]), &volumes(&[]), &ctx);

        assert!(!outcome.mappings.contains_key("L1"));
        assert_eq!(outcome.notes[0].kind, NoteKind::MentionedOnlyDiscarded);
        assert_eq!(outcome.unresolved, vec!["L1"]);
    }

    #[test]
    fn test_mentioned_name_accepted_as_sole_candidate() {
        let resolution = SpeakerResolution::from_pairs(&[("L0", "Dana"), ("L1", "Sam")]);
        let ctx = context(MeetingType::Group, &[("L0", "Dana")], &["Sam"]);

        let outcome = validate(&resolution, &labels(&["L0", "L1"]), &volumes(&[]), &ctx);

        assert_eq!(outcome.mappings["L1"], "Sam");
        assert_eq!(outcome.notes[0].kind, NoteKind::MentionedOnlyAccepted);
        assert!(!outcome.refine);
    }

    #[test]
    fn test_mentioned_name_reverted_when_label_introduced_someone_else() {
        let resolution = SpeakerResolution::from_pairs(&[("L0", "Sam"), ("L1", "Lee")]);
        let ctx = context(MeetingType::Group, &[("L0", "Dana")], &["Sam"]);

        let outcome = validate(&resolution, &labels(&["L0", "L1"]), &volumes(&[]), &ctx);
        assert!(!outcome.mappings.contains_key("L0"));
        assert_eq!(outcome.notes[0].kind, NoteKind::MentionedOnlyDiscarded);
    }

    #[test]
    fn test_duplicate_names_are_ambiguous() {
        let resolution =
            SpeakerResolution::from_pairs(&[("L0", "Dana"), ("L1", "dana"), ("L2", "Lee")]);
        let ctx = context(MeetingType::Group, &[], &[]);

        let outcome = validate(&resolution, &labels(&["L0", "L1", "L2"]), &volumes(&[]), &ctx);

        assert_eq!(outcome.ambiguous.len(), 2);
        assert!(outcome.ambiguous.contains("L0"));
        assert!(outcome.ambiguous.contains("L1"));
        assert_eq!(outcome.notes[0].kind, NoteKind::Ambiguous);
        assert_eq!(outcome.mappings.len(), 3);
    }

    #[test]
    fn test_duplicate_label_and_empty_name() {
        let resolution =
            SpeakerResolution::from_pairs(&[("L0", "Dana"), ("L0", "Lee"), ("L1", " ")]);
        let ctx = context(MeetingType::Group, &[], &[]);

        let outcome = validate(&resolution, &labels(&["L0", "L1"]), &volumes(&[]), &ctx);

        assert_eq!(outcome.mappings.len(), 1);
        assert_eq!(outcome.mappings["L0"], "Dana");
        let kinds: Vec<NoteKind> = outcome.notes.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NoteKind::DuplicateLabel, NoteKind::EmptyName]);
    }

    #[test]
    fn test_refine_ratio_in_larger_meeting() {
        let all = labels(&["L0", "L1", "L2", "L3", "L4"]);
        let ctx = context(MeetingType::Group, &[], &[]);

        let mostly = SpeakerResolution::from_pairs(&[("L0", "A"), ("L1", "B"), ("L2", "C")]);
        assert!(!validate(&mostly, &all, &volumes(&[]), &ctx).refine);

        let few = SpeakerResolution::from_pairs(&[("L0", "A"), ("L1", "B")]);
        assert!(validate(&few, &all, &volumes(&[]), &ctx).refine);
    }
}
