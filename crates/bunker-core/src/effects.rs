//! Special conditions in play.
//!
//! `apply_special` validates a played card in a fixed order (ownership,
//! usage policy, targeting, declared requirements, vote window) before any
//! state changes, so a rejected card never leaves a half-applied effect.
//! Automatic cards fire from `apply_elimination` instead.

use crate::actions::EventKind;
use crate::catalog::{CategoryKey, Deck};
use crate::game::{GameError, GamePhase, GameSession};
use crate::player::{CardInstance, PlayerId, PlayerState};
use crate::random::shuffle;
use crate::ruleset::SpecialUsage;
use crate::specials::{
    ChoiceKind, Effect, Requirement, SecretCondition, Side, SpecialDefinition, SpecialPayload, TargetScope, Trigger,
};
use crate::voting::{VotePhase, REASON_BLOCKED, REASON_WASTED};
use tracing::{debug, warn};

/// Visible content of a hand card, without its identity or reveal flag
#[derive(Debug, Clone)]
struct Face {
    card_id: String,
    label: String,
    missing: bool,
}

impl Face {
    fn of(card: &CardInstance) -> Self {
        Self {
            card_id: card.card_id.clone(),
            label: card.label.clone(),
            missing: card.missing,
        }
    }

    fn put(self, card: &mut CardInstance) {
        card.card_id = self.card_id;
        card.label = self.label;
        card.missing = self.missing;
    }
}

fn requirement_label(requirement: Requirement) -> &'static str {
    match requirement {
        Requirement::PhaseVoting => "only during voting",
        Requirement::PhaseReveal => "only during the reveal phase",
        Requirement::PhaseAny | Requirement::OwnerEliminated => "unavailable",
        Requirement::VotingStarted => "voting has not started",
        Requirement::TargetHasBaggage => "target has no baggage",
        Requirement::TargetHasRevealedHealth => "target has no revealed health",
        Requirement::TargetHasRevealedProfession => "target has no revealed profession",
        Requirement::TargetHasRevealedSameCategory => "target has no revealed card of this category",
        Requirement::NeedsNeighborIndexing => "no neighbors",
        Requirement::AgeFieldAvailable | Requirement::SomeRevealedAges => "no revealed ages",
        Requirement::TrackFirstRevealHealth => "nobody has revealed health yet",
    }
}

fn first_revealed(player: &PlayerState, key: CategoryKey) -> Option<String> {
    player.revealed_in(key).next().map(|c| c.instance_id.clone())
}

impl GameSession {
    pub(crate) fn apply_special(
        &mut self,
        actor: &str,
        instance_id: &str,
        payload: SpecialPayload,
    ) -> Result<bool, GameError> {
        let player = self.players.get(actor).ok_or(GameError::UnknownPlayer)?;
        let special = player.special(instance_id).ok_or(GameError::SpecialNotFound)?;
        let definition = special.definition.clone();
        if !definition.implemented {
            return Err(GameError::SpecialNotImplemented);
        }
        if special.used {
            return Err(GameError::SpecialUsed);
        }
        if self.settings.special_usage == SpecialUsage::OnlyDuringVoting && self.phase != GamePhase::Voting {
            return Err(GameError::SpecialOnlyDuringVoting);
        }
        if definition.trigger.is_automatic() {
            return Err(GameError::AutomaticSpecial);
        }
        if definition.choice_kind != ChoiceKind::None && payload.is_empty() {
            return Err(GameError::ChoiceRequired);
        }

        let target = self.resolve_target(actor, &definition, &payload)?;
        for requirement in &definition.requires {
            self.check_requirement(*requirement, target.as_deref(), &definition.effect)?;
        }
        if definition.effect.needs_vote_window() && self.vote_phase != Some(VotePhase::SpecialWindow) {
            return Err(GameError::SpecialWindowNotOpen);
        }

        self.apply_effect(actor, target.as_deref(), &definition, &payload)?;

        let name = self.player_name(actor);
        if let Some(special) = self.players.get_mut(actor).and_then(|p| p.special_mut(instance_id)) {
            special.used = true;
            special.revealed_public = true;
        }
        debug!(player = actor, effect = definition.effect.kind(), target = ?target, "special applied");
        let message = match target.as_deref() {
            Some(target) if target != actor => {
                format!("{name} plays \"{}\" on {}.", definition.title, self.player_name(target))
            }
            _ => format!("{name} plays \"{}\".", definition.title),
        };
        self.emit(EventKind::Info, message);
        Ok(true)
    }

    /// Turn the payload into a concrete target according to the card's scope
    fn resolve_target(
        &self,
        actor: &str,
        definition: &SpecialDefinition,
        payload: &SpecialPayload,
    ) -> Result<Option<PlayerId>, GameError> {
        let Some(scope) = definition.target_scope else {
            return Ok(None);
        };
        match scope {
            TargetScope::SelfOnly => Ok(Some(actor.to_string())),
            TargetScope::Neighbors => {
                let (left, right) = self.players.neighbors(actor, None);
                if let Some(id) = payload.target_player_id.as_deref() {
                    if left.as_deref() == Some(id) || right.as_deref() == Some(id) {
                        return Ok(Some(id.to_string()));
                    }
                    return Err(GameError::InvalidTarget);
                }
                let picked = match payload.side {
                    Some(Side::Left) => left,
                    Some(Side::Right) => right,
                    None => return Err(GameError::ChoiceRequired),
                };
                picked.map(Some).ok_or(GameError::NeighborNotFound)
            }
            TargetScope::AnyAlive | TargetScope::AnyIncludingSelf => {
                let candidates = self.players.target_candidates(scope, actor);
                if candidates.is_empty() {
                    return Err(GameError::NoTargets);
                }
                let id = payload.target_player_id.as_deref().ok_or(GameError::ChoiceRequired)?;
                if id == actor && !definition.allows_self_target() {
                    return Err(GameError::SelfTarget);
                }
                if !candidates.iter().any(|c| c == id) {
                    return Err(GameError::InvalidTarget);
                }
                Ok(Some(id.to_string()))
            }
        }
    }

    fn check_requirement(
        &self,
        requirement: Requirement,
        target: Option<&str>,
        effect: &Effect,
    ) -> Result<(), GameError> {
        let target_player = target.and_then(|id| self.players.get(id));
        let met = match requirement {
            Requirement::PhaseVoting => self.phase == GamePhase::Voting,
            Requirement::PhaseReveal => self.phase == GamePhase::Reveal,
            Requirement::PhaseAny | Requirement::OwnerEliminated => true,
            Requirement::VotingStarted => self.voting.as_ref().is_some_and(|v| !v.votes.is_empty()),
            Requirement::TargetHasBaggage => target_player.is_some_and(PlayerState::has_baggage),
            Requirement::TargetHasRevealedHealth => {
                target_player.is_some_and(|p| p.has_revealed_in(CategoryKey::Health))
            }
            Requirement::TargetHasRevealedProfession => {
                target_player.is_some_and(|p| p.has_revealed_in(CategoryKey::Profession))
            }
            Requirement::TargetHasRevealedSameCategory => match effect.category() {
                Some(key) => target_player.is_some_and(|p| p.has_revealed_in(key)),
                None => false,
            },
            Requirement::NeedsNeighborIndexing => self.players.order().len() > 1,
            Requirement::AgeFieldAvailable | Requirement::SomeRevealedAges => {
                self.players.alive().any(|p| p.revealed_age().is_some())
            }
            Requirement::TrackFirstRevealHealth => self.first_health_revealer.is_some(),
        };
        if met {
            Ok(())
        } else {
            Err(GameError::RequirementFailed(requirement_label(requirement)))
        }
    }

    fn apply_effect(
        &mut self,
        actor: &str,
        target: Option<&str>,
        definition: &SpecialDefinition,
        payload: &SpecialPayload,
    ) -> Result<(), GameError> {
        let now = self.now_ms();
        match &definition.effect {
            Effect::BanVoteAgainst => {
                let target = target.ok_or(GameError::InvalidTarget)?;
                let owner = self.players.get_mut(actor).ok_or(GameError::UnknownPlayer)?;
                owner.banned_against.insert(target.to_string());
            }
            Effect::VoteWeight { weight } => {
                let voting = self.voting.as_mut().ok_or(GameError::NoVoting)?;
                voting.vote_weights.insert(actor.to_string(), *weight);
            }
            Effect::DisableVote => {
                let target = target.ok_or(GameError::InvalidTarget)?;
                let voting = self.voting.as_mut().ok_or(GameError::NoVoting)?;
                voting.mark_wasted(target, REASON_BLOCKED, now);
            }
            Effect::DoubleVotesAgainstAndDisableSelfVote => {
                let target = target.ok_or(GameError::InvalidTarget)?;
                let voting = self.voting.as_mut().ok_or(GameError::NoVoting)?;
                voting.double_against_target = Some(target.to_string());
                voting.mark_wasted(actor, REASON_WASTED, now);
            }
            Effect::ForceRevote {
                disallow_previous_candidate,
            } => self.force_revote(*disallow_previous_candidate)?,
            Effect::SwapRevealedWithNeighbor { category } => {
                let target = target.ok_or(GameError::InvalidTarget)?;
                self.swap_revealed(actor, target, *category)?;
            }
            Effect::ReplaceRevealedCard { category } => {
                let target = target.unwrap_or(actor);
                self.replace_revealed(target, *category, false)?;
            }
            Effect::DiscardRevealedAndDealHidden { category } => {
                let target = target.unwrap_or(actor);
                self.replace_revealed(target, *category, true)?;
            }
            Effect::RedealAllRevealed { category } => self.redeal_revealed(*category)?,
            Effect::ForceRevealCategoryForAll => {
                let key = payload.category.ok_or(GameError::ChoiceRequired)?;
                self.round_rules.forced_reveal_category = Some(key);
            }
            Effect::SetRoundRule { no_talk_until_voting } => {
                self.round_rules.no_talk_until_voting = *no_talk_until_voting;
            }
            Effect::StealBaggageAndGiveSpecial { give_special_count } => {
                let target = target.ok_or(GameError::InvalidTarget)?;
                self.steal_baggage(actor, target, *give_special_count)?;
            }
            Effect::AddFinalThreat { threat_key } => {
                let key = threat_key.clone().unwrap_or_else(|| definition.id.clone());
                self.final_threats.push(key);
            }
            Effect::None | Effect::ForcedWastedVoteOnNextVoting { .. } | Effect::Unsupported => {
                return Err(GameError::EffectNotSupported);
            }
        }
        Ok(())
    }

    /// Throw away the frozen votes and collect new ones
    fn force_revote(&mut self, disallow_leaders: bool) -> Result<(), GameError> {
        let now = self.now_ms();
        let phase = self.vote_phase;
        let voting = self.voting.as_mut().ok_or(GameError::NoVoting)?;
        if disallow_leaders {
            let leaders = voting.tally(&self.players, phase).leaders;
            voting.revote_disallow_targets = leaders.into_iter().collect();
        }
        voting.reset_for_revote(now);
        self.vote_phase = Some(VotePhase::Voting);
        self.clear_timer();
        self.emit(EventKind::Info, "The vote is cancelled. Vote again.");
        self.set_stage("Revote");
        self.settle_stuck_voters();
        Ok(())
    }

    fn swap_revealed(&mut self, actor: &str, neighbor: &str, key: CategoryKey) -> Result<(), GameError> {
        let mine = self
            .players
            .get(actor)
            .and_then(|p| first_revealed(p, key))
            .ok_or(GameError::RequirementFailed("you have no revealed card of this category"))?;
        let theirs = self
            .players
            .get(neighbor)
            .and_then(|p| first_revealed(p, key))
            .ok_or(GameError::RequirementFailed(requirement_label(
                Requirement::TargetHasRevealedSameCategory,
            )))?;

        let face = |session: &Self, owner: &str, id: &str| {
            session.players.get(owner).and_then(|p| p.card(id)).map(Face::of)
        };
        let (Some(my_face), Some(their_face)) = (face(self, actor, &mine), face(self, neighbor, &theirs)) else {
            return Err(GameError::CardNotFound);
        };
        if let Some(card) = self.players.get_mut(actor).and_then(|p| p.card_mut(&mine)) {
            their_face.put(card);
        }
        if let Some(card) = self.players.get_mut(neighbor).and_then(|p| p.card_mut(&theirs)) {
            my_face.put(card);
        }
        Ok(())
    }

    /// Swap a revealed card's content for a fresh draw. The card keeps its
    /// instance id; `hide` turns it face down again.
    fn replace_revealed(&mut self, target: &str, key: CategoryKey, hide: bool) -> Result<(), GameError> {
        let card_id = self
            .players
            .get(target)
            .and_then(|p| first_revealed(p, key))
            .ok_or(GameError::RequirementFailed("target has no revealed card of this category"))?;
        let drawn = self
            .deal
            .take(key.deck(), &mut *self.rng)
            .ok_or(GameError::NoCardsLeft(key.label()))?;
        let card = self
            .players
            .get_mut(target)
            .and_then(|p| p.card_mut(&card_id))
            .ok_or(GameError::CardNotFound)?;
        card.card_id = drawn.id;
        card.label = drawn.label;
        card.missing = false;
        if hide {
            card.revealed = false;
        }
        Ok(())
    }

    /// Shuffle the contents of every revealed card of a category among the
    /// alive players holding one
    fn redeal_revealed(&mut self, key: CategoryKey) -> Result<(), GameError> {
        let slots: Vec<(PlayerId, String)> = self
            .players
            .alive()
            .flat_map(|p| p.revealed_in(key).map(|c| (p.id.clone(), c.instance_id.clone())))
            .collect();
        if slots.is_empty() {
            return Err(GameError::RequirementFailed("no revealed cards of this category"));
        }
        let mut faces: Vec<Face> = slots
            .iter()
            .filter_map(|(owner, id)| self.players.get(owner).and_then(|p| p.card(id)).map(Face::of))
            .collect();
        shuffle(&mut faces, &mut *self.rng);
        for ((owner, id), face) in slots.iter().zip(faces) {
            if let Some(card) = self.players.get_mut(owner).and_then(|p| p.card_mut(id)) {
                face.put(card);
            }
        }
        Ok(())
    }

    fn steal_baggage(&mut self, actor: &str, target: &str, give_special_count: u32) -> Result<(), GameError> {
        if self.deal.remaining_specials() < give_special_count as usize {
            return Err(GameError::NoSpecialsLeft);
        }
        let victim = self.players.get_mut(target).ok_or(GameError::UnknownPlayer)?;
        let index = victim
            .hand
            .iter()
            .position(|c| c.deck == Deck::Baggage && !c.missing)
            .ok_or(GameError::RequirementFailed(requirement_label(Requirement::TargetHasBaggage)))?;
        let mut card = victim.hand.remove(index);
        card.instance_id = self.deal.next_instance_id(actor);
        if let Some(thief) = self.players.get_mut(actor) {
            thief.hand.push(card);
        }
        for _ in 0..give_special_count {
            let special = self.deal.deal_special(target, &mut *self.rng);
            if let Some(victim) = self.players.get_mut(target) {
                victim.special_conditions.push(special);
            }
        }
        Ok(())
    }

    // ==================== Automatic Triggers ====================

    /// Cards that fire when their owner is eliminated
    pub(crate) fn fire_owner_eliminated_triggers(&mut self, eliminated: &str) {
        let Some(player) = self.players.get_mut(eliminated) else {
            return;
        };
        let mut threats = Vec::new();
        for special in player
            .special_conditions
            .iter_mut()
            .filter(|s| !s.used && s.definition.trigger == Trigger::OnOwnerEliminated)
        {
            match &special.definition.effect {
                Effect::AddFinalThreat { threat_key } => {
                    threats.push(threat_key.clone().unwrap_or_else(|| special.definition.id.clone()));
                }
                other => {
                    warn!(effect = other.kind(), "effect cannot fire on elimination");
                    continue;
                }
            }
            special.used = true;
            special.revealed_public = true;
        }
        if threats.is_empty() {
            return;
        }
        let name = player.name.clone();
        self.final_threats.extend(threats);
        self.emit(EventKind::Info, format!("{name}'s hidden threat will await the bunker."));
    }

    /// Secret cards held by others that watch for this elimination
    pub(crate) fn fire_secret_triggers(&mut self, eliminated: &str) {
        let mut fired: Vec<(PlayerId, String)> = Vec::new();
        for owner in self.players.iter().filter(|p| p.is_alive() && p.id != eliminated) {
            for special in owner
                .special_conditions
                .iter()
                .filter(|s| !s.used && s.definition.trigger == Trigger::SecretOnEliminate)
            {
                let Effect::ForcedWastedVoteOnNextVoting { condition } = &special.definition.effect else {
                    continue;
                };
                if self.secret_condition_met(*condition, &owner.id, eliminated) {
                    fired.push((owner.id.clone(), special.instance_id.clone()));
                }
            }
        }

        for (owner, instance_id) in fired {
            let Some(player) = self.players.get_mut(&owner) else {
                continue;
            };
            player.forced_wasted_vote_next = true;
            if let Some(special) = player.special_mut(&instance_id) {
                special.used = true;
                special.revealed_public = true;
            }
            let name = player.name.clone();
            debug!(owner = %owner, eliminated, "secret condition fired");
            self.emit(
                EventKind::Info,
                format!("{name}'s secret condition fires: their next vote is wasted."),
            );
        }
    }

    fn secret_condition_met(&self, condition: SecretCondition, owner: &str, eliminated: &str) -> bool {
        match condition {
            SecretCondition::LeftNeighborEliminated => {
                self.players.neighbors(owner, Some(eliminated)).0.as_deref() == Some(eliminated)
            }
            SecretCondition::RightNeighborEliminated => {
                self.players.neighbors(owner, Some(eliminated)).1.as_deref() == Some(eliminated)
            }
            SecretCondition::YoungestByRevealedAgeEliminated => self.age_extreme_is(eliminated, |age, other| age <= other),
            SecretCondition::OldestByRevealedAgeEliminated => self.age_extreme_is(eliminated, |age, other| age >= other),
            SecretCondition::FirstRevealedHealthEliminated => self.first_health_revealer.as_deref() == Some(eliminated),
        }
    }

    /// Whether `eliminated` has a revealed age that beats (or ties) every
    /// other revealed age among the alive players
    fn age_extreme_is(&self, eliminated: &str, beats: impl Fn(u32, u32) -> bool) -> bool {
        let Some(age) = self.players.get(eliminated).and_then(PlayerState::revealed_age) else {
            return false;
        };
        self.players
            .alive()
            .filter(|p| p.id != eliminated)
            .filter_map(PlayerState::revealed_age)
            .all(|other| beats(age, other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::player::PlayerStatus;
    use crate::ruleset::{GameSettings, Ruleset};
    use crate::specials::standard_catalog;
    use crate::test_support::{give_special, reveal_until_voting, session_with, session_with_specials, vote};
    use pretty_assertions::assert_eq;

    fn voting_ruleset() -> Ruleset {
        Ruleset {
            votes_per_round: vec![1, 1],
            bunker_seats: 2,
            total_exiles: 2,
        }
    }

    fn play(session: &mut GameSession, actor: &str, instance: &str, payload: SpecialPayload) -> Option<String> {
        session
            .handle_action(
                actor,
                Action::ApplySpecial {
                    special_instance_id: instance.into(),
                    payload,
                },
            )
            .error
    }

    fn reveal_category(session: &mut GameSession, id: &str, key: CategoryKey) -> String {
        let player = session.players.get_mut(id).unwrap();
        let card = player.hand.iter_mut().find(|c| key.matches(c) && !c.revealed).unwrap();
        card.revealed = true;
        card.instance_id.clone()
    }

    #[test]
    fn test_unknown_and_used_specials() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        assert_eq!(
            play(&mut session, "a", "nope", SpecialPayload::default()).as_deref(),
            Some("Special condition not found")
        );

        let silence = give_special(&mut session, "a", "silence");
        assert_eq!(play(&mut session, "a", &silence, SpecialPayload::default()), None);
        assert!(session.round_rules().no_talk_until_voting);
        let special = session.player("a").unwrap().special(&silence).unwrap();
        assert!(special.used && special.revealed_public);

        assert_eq!(
            play(&mut session, "a", &silence, SpecialPayload::default()).as_deref(),
            Some("This card has already been used")
        );
    }

    #[test]
    fn test_unknown_effect_fails_soft() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let definition = SpecialDefinition {
            id: "from_the_future".into(),
            title: "Future Card".into(),
            text: "Does something a newer engine knows about.".into(),
            trigger: Trigger::Active,
            effect: Effect::Unsupported,
            implemented: true,
            requires: Vec::new(),
            choice_kind: ChoiceKind::None,
            target_scope: None,
        };
        let owner = session.players.get_mut("a").unwrap();
        owner
            .special_conditions
            .push(crate::specials::SpecialInstance::new("future-a".into(), definition));

        assert_eq!(
            play(&mut session, "a", "future-a", SpecialPayload::default()).as_deref(),
            Some("Effect not supported")
        );
        assert!(!session.player("a").unwrap().special("future-a").unwrap().used);
    }

    #[test]
    fn test_effectless_card_is_not_consumed() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let definition = SpecialDefinition {
            id: "blank".into(),
            title: "Blank Card".into(),
            text: "Nothing printed on it.".into(),
            trigger: Trigger::Active,
            effect: Effect::None,
            implemented: true,
            requires: Vec::new(),
            choice_kind: ChoiceKind::None,
            target_scope: None,
        };
        let owner = session.players.get_mut("a").unwrap();
        owner
            .special_conditions
            .push(crate::specials::SpecialInstance::new("blank-a".into(), definition));

        assert_eq!(
            play(&mut session, "a", "blank-a", SpecialPayload::default()).as_deref(),
            Some("Effect not supported")
        );
        let special = session.player("a").unwrap().special("blank-a").unwrap();
        assert!(!special.used && !special.revealed_public);
    }

    #[test]
    fn test_automatic_cards_cannot_be_played() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let guard = give_special(&mut session, "a", "protect_left");
        assert_eq!(
            play(&mut session, "a", &guard, SpecialPayload::default()).as_deref(),
            Some("This card triggers automatically")
        );
    }

    #[test]
    fn test_only_during_voting_policy() {
        let settings = GameSettings {
            special_usage: SpecialUsage::OnlyDuringVoting,
            ..GameSettings::default()
        };
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, settings);
        let silence = give_special(&mut session, "a", "silence");
        assert_eq!(
            play(&mut session, "a", &silence, SpecialPayload::default()).as_deref(),
            Some("Special conditions can only be used during voting")
        );
    }

    #[test]
    fn test_player_choice_needs_payload_and_valid_target() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let steal = give_special(&mut session, "a", "need_more");
        assert_eq!(
            play(&mut session, "a", &steal, SpecialPayload::default()).as_deref(),
            Some("A choice is required to play this card")
        );
        assert_eq!(
            play(&mut session, "a", &steal, SpecialPayload::target("a")).as_deref(),
            Some("You cannot target yourself")
        );
        assert_eq!(
            play(&mut session, "a", &steal, SpecialPayload::target("zz")).as_deref(),
            Some("Invalid target")
        );
    }

    #[test]
    fn test_vote_effects_wait_for_the_window() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(voting_ruleset()), GameSettings::default());
        reveal_until_voting(&mut session);
        let weight = give_special(&mut session, "a", "vote_weight");
        assert_eq!(
            play(&mut session, "a", &weight, SpecialPayload::default()).as_deref(),
            Some("The special conditions window is not open")
        );
        // failed attempts leave the card unused
        assert!(!session.player("a").unwrap().special(&weight).unwrap().used);
    }

    #[test]
    fn test_vote_weight_changes_the_result() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(voting_ruleset()), GameSettings::default());
        reveal_until_voting(&mut session);
        let weight = give_special(&mut session, "a", "vote_weight");
        vote(&mut session, "a", "b");
        vote(&mut session, "b", "c");
        vote(&mut session, "c", "d");
        vote(&mut session, "d", "c");
        assert_eq!(session.vote_phase(), Some(VotePhase::SpecialWindow));

        assert_eq!(play(&mut session, "a", &weight, SpecialPayload::default()), None);
        // a: 2 on b, c: 2 on c; tie goes to a revote between b and c
        assert!(session.handle_action("a", Action::FinalizeVoting).is_ok());
        assert_eq!(session.vote_phase(), Some(VotePhase::Voting));
        assert_eq!(session.voting().unwrap().candidates, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_ban_vote_against_in_window() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(voting_ruleset()), GameSettings::default());
        reveal_until_voting(&mut session);
        let ban = give_special(&mut session, "a", "ban_vote_against");
        vote(&mut session, "a", "d");
        vote(&mut session, "b", "a");
        vote(&mut session, "c", "a");
        vote(&mut session, "d", "c");

        assert_eq!(play(&mut session, "a", &ban, SpecialPayload::target("b")), None);
        assert!(session.player("a").unwrap().banned_against.contains("b"));
        assert!(session.handle_action("a", Action::FinalizeVoting).is_ok());
        // a 1, c 1, d 1 after b's vote is voided: tie, revote
        assert_eq!(session.vote_phase(), Some(VotePhase::Voting));
    }

    #[test]
    fn test_disable_vote_and_compromat() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(voting_ruleset()), GameSettings::default());
        reveal_until_voting(&mut session);
        let discredit = give_special(&mut session, "a", "disable_vote");
        let compromat = give_special(&mut session, "b", "compromat");
        vote(&mut session, "a", "c");
        vote(&mut session, "b", "d");
        vote(&mut session, "c", "d");
        vote(&mut session, "d", "c");

        assert_eq!(play(&mut session, "a", &discredit, SpecialPayload::target("c")), None);
        assert_eq!(play(&mut session, "b", &compromat, SpecialPayload::target("c")), None);
        // a: 2 on c, d: 2 on c, b spent, c blocked
        assert!(session.handle_action("b", Action::FinalizeVoting).is_ok());
        assert_eq!(session.player("c").unwrap().status, PlayerStatus::Eliminated);
    }

    #[test]
    fn test_force_revote_excludes_leaders() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(voting_ruleset()), GameSettings::default());
        reveal_until_voting(&mut session);
        let plan_b = give_special(&mut session, "d", "plan_b");
        vote(&mut session, "a", "d");
        vote(&mut session, "b", "d");
        vote(&mut session, "c", "d");
        vote(&mut session, "d", "a");

        assert_eq!(play(&mut session, "d", &plan_b, SpecialPayload::default()), None);
        assert_eq!(session.vote_phase(), Some(VotePhase::Voting));
        let voting = session.voting().unwrap();
        assert!(voting.votes.is_empty());
        assert!(voting.revote_disallow_targets.contains("d"));

        let outcome = session.handle_action(
            "a",
            Action::Vote {
                target_player_id: "d".into(),
            },
        );
        assert_eq!(
            outcome.error.as_deref(),
            Some("This candidate cannot be chosen in the revote")
        );
    }

    #[test]
    fn test_force_category_for_all() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let question = give_special(&mut session, "a", "force_category");
        assert_eq!(
            play(&mut session, "a", &question, SpecialPayload::category(CategoryKey::Health)),
            None
        );

        let hobby = session
            .player("a")
            .unwrap()
            .hand
            .iter()
            .find(|c| c.deck == Deck::Hobby)
            .unwrap()
            .instance_id
            .clone();
        let outcome = session.handle_action("a", Action::RevealCard { card_id: hobby });
        assert_eq!(
            outcome.error.as_deref(),
            Some("This round you must reveal a card of category \"Health\"")
        );
    }

    #[test]
    fn test_swap_with_neighbor() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let trade = give_special(&mut session, "a", "swap_health");
        let mine = reveal_category(&mut session, "a", CategoryKey::Health);
        let theirs = reveal_category(&mut session, "d", CategoryKey::Health);
        let my_label = session.player("a").unwrap().card(&mine).unwrap().label.clone();
        let their_label = session.player("d").unwrap().card(&theirs).unwrap().label.clone();

        // c is not adjacent to a
        assert_eq!(
            play(&mut session, "a", &trade, SpecialPayload::target("c")).as_deref(),
            Some("Invalid target")
        );
        assert_eq!(play(&mut session, "a", &trade, SpecialPayload::side(Side::Left)), None);
        assert_eq!(session.player("a").unwrap().card(&mine).unwrap().label, their_label);
        assert_eq!(session.player("d").unwrap().card(&theirs).unwrap().label, my_label);
    }

    #[test]
    fn test_replace_and_discard_keep_instance_ids() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let pills = give_special(&mut session, "a", "replace_health");
        let good_pills = give_special(&mut session, "a", "discard_health");
        assert!(play(&mut session, "a", &pills, SpecialPayload::target("b")).is_some());

        let card = reveal_category(&mut session, "b", CategoryKey::Health);
        let before = session.player("b").unwrap().card(&card).unwrap().card_id.clone();
        assert_eq!(play(&mut session, "a", &pills, SpecialPayload::target("b")), None);
        let after = session.player("b").unwrap().card(&card).unwrap().clone();
        assert_ne!(after.card_id, before);
        assert!(after.revealed);

        assert_eq!(play(&mut session, "a", &good_pills, SpecialPayload::target("b")), None);
        assert!(!session.player("b").unwrap().card(&card).unwrap().revealed);
    }

    #[test]
    fn test_redeal_needs_revealed_cards() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let redeal = give_special(&mut session, "a", "redeal_hobby");
        assert_eq!(
            play(&mut session, "a", &redeal, SpecialPayload::default()).as_deref(),
            Some("Requirement not met: no revealed cards of this category")
        );

        let mut labels = Vec::new();
        for id in ["a", "b", "c"] {
            let card = reveal_category(&mut session, id, CategoryKey::Hobby);
            labels.push(session.player(id).unwrap().card(&card).unwrap().label.clone());
        }
        assert_eq!(play(&mut session, "a", &redeal, SpecialPayload::default()), None);
        let mut after: Vec<String> = ["a", "b", "c"]
            .iter()
            .filter_map(|id| session.player(id)?.revealed_in(CategoryKey::Hobby).next())
            .map(|c| c.label.clone())
            .collect();
        labels.sort();
        after.sort();
        assert_eq!(after, labels);
    }

    #[test]
    fn test_steal_baggage_needs_specials_in_the_pool() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let steal = give_special(&mut session, "a", "need_more");
        assert_eq!(
            play(&mut session, "a", &steal, SpecialPayload::target("b")).as_deref(),
            Some("No special conditions left in the deck")
        );
        assert!(session.player("b").unwrap().has_baggage());
    }

    #[test]
    fn test_steal_baggage_gives_new_special() {
        let (mut session, _, _) = session_with_specials(
            &["a", "b", "c", "d"],
            None,
            GameSettings::default(),
            standard_catalog(),
        );
        let steal = give_special(&mut session, "a", "need_more");
        let before = session.player("a").unwrap().hand.len();
        assert_eq!(play(&mut session, "a", &steal, SpecialPayload::target("b")), None);

        let thief = session.player("a").unwrap();
        assert_eq!(thief.hand.len(), before + 1);
        assert_eq!(thief.hand.iter().filter(|c| c.deck == Deck::Baggage).count(), 2);
        let ids: std::collections::HashSet<_> = thief.hand.iter().map(|c| c.instance_id.as_str()).collect();
        assert_eq!(ids.len(), thief.hand.len());

        let victim = session.player("b").unwrap();
        assert!(!victim.has_baggage());
        assert_eq!(victim.special_conditions.len(), 2);
    }

    #[test]
    fn test_steal_baggage_skips_placeholder_cards() {
        let (mut session, _, _) = session_with_specials(
            &["a", "b", "c", "d"],
            None,
            GameSettings::default(),
            standard_catalog(),
        );
        let steal = give_special(&mut session, "a", "need_more");
        let victim = session.players.get_mut("b").unwrap();
        let real = victim.hand.iter().position(|c| c.deck == Deck::Baggage).unwrap();
        let mut placeholder = victim.hand[real].clone();
        placeholder.instance_id = "b-placeholder".into();
        placeholder.label = "Missing card".into();
        placeholder.missing = true;
        victim.hand.insert(0, placeholder);
        let taken = victim.hand[real + 1].card_id.clone();

        assert_eq!(play(&mut session, "a", &steal, SpecialPayload::target("b")), None);
        let victim = session.player("b").unwrap();
        assert!(victim.hand.iter().any(|c| c.instance_id == "b-placeholder"));
        assert!(!victim.has_baggage());
        let thief = session.player("a").unwrap();
        assert!(thief.hand.iter().any(|c| c.card_id == taken && !c.missing));
        assert!(thief.hand.iter().all(|c| !c.missing));
    }

    #[test]
    fn test_steal_baggage_rejects_placeholder_only_victim() {
        let (mut session, _, _) = session_with_specials(
            &["a", "b", "c", "d"],
            None,
            GameSettings::default(),
            standard_catalog(),
        );
        let steal = give_special(&mut session, "a", "need_more");
        let pool = session.deal.remaining_specials();
        for card in session.players.get_mut("b").unwrap().hand.iter_mut() {
            if card.deck == Deck::Baggage {
                card.missing = true;
            }
        }

        assert_eq!(
            play(&mut session, "a", &steal, SpecialPayload::target("b")).as_deref(),
            Some("Requirement not met: target has no baggage")
        );
        assert!(!session.player("a").unwrap().special(&steal).unwrap().used);
        assert_eq!(session.deal.remaining_specials(), pool);
        assert!(session.player("b").unwrap().hand.iter().any(|c| c.deck == Deck::Baggage));
    }

    #[test]
    fn test_final_threat_fires_on_owner_elimination() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d", "e"], None, GameSettings::default());
        let threat = give_special(&mut session, "e", "final_threat");
        session.handle_action("a", Action::DevKickPlayer { target_player_id: "e".into() });
        assert_eq!(session.final_threats(), &["raiders_know_bunker".to_string()]);
        assert!(session.player("e").unwrap().special(&threat).unwrap().revealed_public);
    }

    #[test]
    fn test_secret_neighbor_guard_wastes_next_vote() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d", "e"], None, GameSettings::default());
        // b's left neighbor is a, c's left neighbor is b
        give_special(&mut session, "b", "protect_left");
        let guard = give_special(&mut session, "c", "protect_left");
        session.handle_action("a", Action::DevKickPlayer { target_player_id: "b".into() });

        let c = session.player("c").unwrap();
        assert!(c.forced_wasted_vote_next);
        assert!(c.special(&guard).unwrap().used);
        assert!(!session.player("d").unwrap().forced_wasted_vote_next);
    }

    #[test]
    fn test_secret_age_guard() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d", "e"], None, GameSettings::default());
        give_special(&mut session, "a", "protect_youngest");
        give_special(&mut session, "c", "protect_oldest");
        for (id, label) in [("b", "Female, 24 years"), ("c", "Male, 71 years"), ("d", "Male, 45 years")] {
            let card = reveal_category(&mut session, id, CategoryKey::Biology);
            session.players.get_mut(id).unwrap().card_mut(&card).unwrap().label = label.into();
        }

        session.handle_action("a", Action::DevKickPlayer { target_player_id: "b".into() });
        assert!(session.player("a").unwrap().forced_wasted_vote_next);
        assert!(!session.player("c").unwrap().forced_wasted_vote_next);
    }

    #[test]
    fn test_forced_wasted_vote_applies_at_next_voting() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d", "e"], Some(voting_ruleset()), GameSettings::default());
        session.players.get_mut("c").unwrap().forced_wasted_vote_next = true;
        reveal_until_voting(&mut session);
        let voting = session.voting().unwrap();
        assert!(voting.auto_wasted_voters.contains("c"));
        assert!(!voting.votes["c"].valid);
        assert!(!session.player("c").unwrap().forced_wasted_vote_next);
    }
}
