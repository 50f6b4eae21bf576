//! Special-condition cards: definitions, instances and the built-in catalog.
//!
//! A definition is immutable catalog data. Targeting is authored explicitly
//! (`choice_kind` + `target_scope`) rather than inferred from card text.

use crate::catalog::CategoryKey;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};

/// When a special card fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// Played by its owner
    Active,
    /// Played by its owner during a vote
    OnVote,
    /// Played by its owner, typically right after a reveal
    OnRevealOrActive,
    /// Fires on its own when the owner is eliminated
    OnOwnerEliminated,
    /// Fires on its own when a secretly chosen player is eliminated
    #[serde(rename = "secret_onEliminate")]
    SecretOnEliminate,
}

impl Trigger {
    pub fn is_automatic(&self) -> bool {
        matches!(self, Trigger::OnOwnerEliminated | Trigger::SecretOnEliminate)
    }
}

/// Who a card may be aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetScope {
    /// Nearest alive player on either side of the owner
    Neighbors,
    /// Any alive player except the owner
    AnyAlive,
    /// Only the owner
    #[serde(rename = "self")]
    SelfOnly,
    /// Any alive player, owner included
    AnyIncludingSelf,
}

/// What the client must ask the owner for before applying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChoiceKind {
    #[default]
    None,
    Player,
    Neighbor,
    Category,
}

/// Semantic precondition a card declares in its `requires` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Requirement {
    #[serde(rename = "phase=voting")]
    PhaseVoting,
    #[serde(rename = "phase=reveal")]
    PhaseReveal,
    #[serde(rename = "phase=any")]
    PhaseAny,
    VotingStarted,
    TargetHasBaggage,
    TargetHasRevealedHealth,
    TargetHasRevealedProfession,
    TargetHasRevealedSameCategory,
    NeedsNeighborIndexing,
    AgeFieldAvailable,
    SomeRevealedAges,
    TrackFirstRevealHealth,
    OwnerEliminated,
}

/// Which elimination a secret card is watching for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecretCondition {
    LeftNeighborEliminated,
    RightNeighborEliminated,
    YoungestByRevealedAgeEliminated,
    OldestByRevealedAgeEliminated,
    FirstRevealedHealthEliminated,
}

fn default_weight() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_give_count() -> u32 {
    1
}

/// Effect descriptor. Unknown `type` tags deserialize to `Unsupported`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Effect {
    BanVoteAgainst,
    VoteWeight {
        #[serde(default = "default_weight")]
        weight: u32,
    },
    DisableVote,
    #[serde(rename = "doubleVotesAgainst_and_disableSelfVote")]
    DoubleVotesAgainstAndDisableSelfVote,
    #[serde(rename_all = "camelCase")]
    ForceRevote {
        #[serde(default)]
        disallow_previous_candidate: bool,
    },
    SwapRevealedWithNeighbor {
        category: CategoryKey,
    },
    ReplaceRevealedCard {
        category: CategoryKey,
    },
    DiscardRevealedAndDealHidden {
        category: CategoryKey,
    },
    RedealAllRevealed {
        category: CategoryKey,
    },
    ForceRevealCategoryForAll,
    #[serde(rename_all = "camelCase")]
    SetRoundRule {
        #[serde(default = "default_true")]
        no_talk_until_voting: bool,
    },
    #[serde(rename = "stealBaggage_and_giveSpecial", rename_all = "camelCase")]
    StealBaggageAndGiveSpecial {
        #[serde(default = "default_give_count")]
        give_special_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    AddFinalThreat {
        #[serde(default)]
        threat_key: Option<String>,
    },
    ForcedWastedVoteOnNextVoting {
        condition: SecretCondition,
    },
    None,
    #[serde(other)]
    Unsupported,
}

impl Effect {
    /// Stable tag, as it appears in catalog files
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::BanVoteAgainst => "banVoteAgainst",
            Effect::VoteWeight { .. } => "voteWeight",
            Effect::DisableVote => "disableVote",
            Effect::DoubleVotesAgainstAndDisableSelfVote => "doubleVotesAgainst_and_disableSelfVote",
            Effect::ForceRevote { .. } => "forceRevote",
            Effect::SwapRevealedWithNeighbor { .. } => "swapRevealedWithNeighbor",
            Effect::ReplaceRevealedCard { .. } => "replaceRevealedCard",
            Effect::DiscardRevealedAndDealHidden { .. } => "discardRevealedAndDealHidden",
            Effect::RedealAllRevealed { .. } => "redealAllRevealed",
            Effect::ForceRevealCategoryForAll => "forceRevealCategoryForAll",
            Effect::SetRoundRule { .. } => "setRoundRule",
            Effect::StealBaggageAndGiveSpecial { .. } => "stealBaggage_and_giveSpecial",
            Effect::AddFinalThreat { .. } => "addFinalThreat",
            Effect::ForcedWastedVoteOnNextVoting { .. } => "forcedWastedVoteOnNextVoting",
            Effect::None => "none",
            Effect::Unsupported => "unsupported",
        }
    }

    /// Effects that only make sense while the post-vote window is open
    pub fn needs_vote_window(&self) -> bool {
        matches!(
            self,
            Effect::BanVoteAgainst
                | Effect::DisableVote
                | Effect::VoteWeight { .. }
                | Effect::ForceRevote { .. }
                | Effect::DoubleVotesAgainstAndDisableSelfVote
        )
    }

    /// Category parameter, for effects that carry one
    pub fn category(&self) -> Option<CategoryKey> {
        match self {
            Effect::SwapRevealedWithNeighbor { category }
            | Effect::ReplaceRevealedCard { category }
            | Effect::DiscardRevealedAndDealHidden { category }
            | Effect::RedealAllRevealed { category } => Some(*category),
            _ => None,
        }
    }
}

/// Immutable catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialDefinition {
    pub id: String,
    pub title: String,
    pub text: String,
    pub trigger: Trigger,
    pub effect: Effect,
    #[serde(default)]
    pub implemented: bool,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub choice_kind: ChoiceKind,
    #[serde(default)]
    pub target_scope: Option<TargetScope>,
}

impl SpecialDefinition {
    pub fn allows_self_target(&self) -> bool {
        matches!(
            self.target_scope,
            Some(TargetScope::SelfOnly) | Some(TargetScope::AnyIncludingSelf)
        )
    }

    /// Placeholder handed out once the special pool is empty
    pub fn missing() -> Self {
        Self {
            id: "missing-special".into(),
            title: "No condition available".into(),
            text: "The special conditions deck is empty.".into(),
            trigger: Trigger::Active,
            effect: Effect::None,
            implemented: false,
            requires: Vec::new(),
            choice_kind: ChoiceKind::None,
            target_scope: None,
        }
    }
}

/// A special card held by one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialInstance {
    pub instance_id: String,
    pub definition: SpecialDefinition,
    pub used: bool,
    pub revealed_public: bool,
}

impl SpecialInstance {
    pub fn new(instance_id: String, definition: SpecialDefinition) -> Self {
        Self {
            instance_id,
            definition,
            used: false,
            revealed_public: false,
        }
    }
}

/// Side of a neighbor choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Left,
    Right,
}

/// Player input accompanying `applySpecial`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_player_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryKey>,
}

impl SpecialPayload {
    pub fn target(id: impl Into<PlayerId>) -> Self {
        Self {
            target_player_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn side(side: Side) -> Self {
        Self {
            side: Some(side),
            ..Self::default()
        }
    }

    pub fn category(category: CategoryKey) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.target_player_id.is_none() && self.side.is_none() && self.category.is_none()
    }
}

struct Blueprint {
    id: &'static str,
    title: &'static str,
    text: &'static str,
    trigger: Trigger,
    effect: Effect,
    requires: &'static [Requirement],
    choice_kind: ChoiceKind,
    target_scope: Option<TargetScope>,
}

impl From<Blueprint> for SpecialDefinition {
    fn from(blueprint: Blueprint) -> Self {
        Self {
            id: blueprint.id.into(),
            title: blueprint.title.into(),
            text: blueprint.text.into(),
            trigger: blueprint.trigger,
            effect: blueprint.effect,
            implemented: true,
            requires: blueprint.requires.to_vec(),
            choice_kind: blueprint.choice_kind,
            target_scope: blueprint.target_scope,
        }
    }
}

fn redeal(id: &'static str, title: &'static str, category: CategoryKey) -> Blueprint {
    Blueprint {
        id,
        title,
        text: "Shuffle every revealed card of this category between the living players.",
        trigger: Trigger::Active,
        effect: Effect::RedealAllRevealed { category },
        requires: &[Requirement::PhaseAny],
        choice_kind: ChoiceKind::None,
        target_scope: None,
    }
}

fn swap(id: &'static str, title: &'static str, category: CategoryKey) -> Blueprint {
    Blueprint {
        id,
        title,
        text: "Swap your revealed card of this category with a neighbor's.",
        trigger: Trigger::Active,
        effect: Effect::SwapRevealedWithNeighbor { category },
        requires: &[
            Requirement::TargetHasRevealedSameCategory,
            Requirement::NeedsNeighborIndexing,
        ],
        choice_kind: ChoiceKind::Neighbor,
        target_scope: Some(TargetScope::Neighbors),
    }
}

fn protect(id: &'static str, title: &'static str, text: &'static str, condition: SecretCondition) -> Blueprint {
    let requires: &'static [Requirement] = match condition {
        SecretCondition::LeftNeighborEliminated | SecretCondition::RightNeighborEliminated => {
            &[Requirement::NeedsNeighborIndexing]
        }
        SecretCondition::YoungestByRevealedAgeEliminated
        | SecretCondition::OldestByRevealedAgeEliminated => {
            &[Requirement::AgeFieldAvailable, Requirement::SomeRevealedAges]
        }
        SecretCondition::FirstRevealedHealthEliminated => &[Requirement::TrackFirstRevealHealth],
    };
    Blueprint {
        id,
        title,
        text,
        trigger: Trigger::SecretOnEliminate,
        effect: Effect::ForcedWastedVoteOnNextVoting { condition },
        requires,
        choice_kind: ChoiceKind::None,
        target_scope: None,
    }
}

/// The built-in special-conditions deck
pub fn standard_catalog() -> Vec<SpecialDefinition> {
    let blueprints = vec![
        Blueprint {
            id: "ban_vote_against",
            title: "Be a Friend",
            text: "The chosen player may not vote against you for the rest of the game.",
            trigger: Trigger::Active,
            effect: Effect::BanVoteAgainst,
            requires: &[Requirement::PhaseVoting],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
        Blueprint {
            id: "vote_weight",
            title: "Loud Voice",
            text: "Your vote counts twice in this vote.",
            trigger: Trigger::OnVote,
            effect: Effect::VoteWeight { weight: 2 },
            requires: &[Requirement::PhaseVoting],
            choice_kind: ChoiceKind::None,
            target_scope: None,
        },
        redeal("redeal_baggage", "Baggage on the Table", CategoryKey::Baggage),
        redeal("redeal_biology", "Biology on the Table", CategoryKey::Biology),
        redeal("redeal_health", "Health on the Table", CategoryKey::Health),
        redeal("redeal_facts", "Facts on the Table", CategoryKey::Facts),
        redeal("redeal_hobby", "Hobbies on the Table", CategoryKey::Hobby),
        Blueprint {
            id: "disable_vote",
            title: "Discredit",
            text: "The chosen player loses their vote in the current vote.",
            trigger: Trigger::Active,
            effect: Effect::DisableVote,
            requires: &[Requirement::PhaseVoting],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
        protect(
            "protect_left",
            "Guard the Left",
            "If your left neighbor is eliminated, your next vote is wasted.",
            SecretCondition::LeftNeighborEliminated,
        ),
        protect(
            "protect_right",
            "Guard the Right",
            "If your right neighbor is eliminated, your next vote is wasted.",
            SecretCondition::RightNeighborEliminated,
        ),
        protect(
            "protect_youngest",
            "Guard the Youngest",
            "If the youngest player by revealed age is eliminated, your next vote is wasted.",
            SecretCondition::YoungestByRevealedAgeEliminated,
        ),
        protect(
            "protect_brave",
            "Guard the Brave",
            "If the first player to reveal health is eliminated, your next vote is wasted.",
            SecretCondition::FirstRevealedHealthEliminated,
        ),
        protect(
            "protect_oldest",
            "Guard the Eldest",
            "If the oldest player by revealed age is eliminated, your next vote is wasted.",
            SecretCondition::OldestByRevealedAgeEliminated,
        ),
        Blueprint {
            id: "compromat",
            title: "Compromising Evidence",
            text: "Votes against the chosen player count double; your own vote is spent.",
            trigger: Trigger::Active,
            effect: Effect::DoubleVotesAgainstAndDisableSelfVote,
            requires: &[Requirement::PhaseVoting],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
        Blueprint {
            id: "need_more",
            title: "I Need It More",
            text: "Take the chosen player's baggage; they draw a new special condition.",
            trigger: Trigger::Active,
            effect: Effect::StealBaggageAndGiveSpecial {
                give_special_count: 1,
            },
            requires: &[Requirement::TargetHasBaggage],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
        Blueprint {
            id: "silence",
            title: "Silence",
            text: "Nobody may talk until the vote starts this round.",
            trigger: Trigger::OnRevealOrActive,
            effect: Effect::SetRoundRule {
                no_talk_until_voting: true,
            },
            requires: &[Requirement::PhaseReveal],
            choice_kind: ChoiceKind::None,
            target_scope: None,
        },
        swap("swap_baggage", "Trade Baggage", CategoryKey::Baggage),
        swap("swap_biology", "Trade Biology", CategoryKey::Biology),
        swap("swap_health", "Trade Health", CategoryKey::Health),
        swap("swap_facts", "Trade Facts", CategoryKey::Facts),
        swap("swap_hobby", "Trade Hobbies", CategoryKey::Hobby),
        Blueprint {
            id: "plan_b",
            title: "Plan B",
            text: "Cancel the vote and vote again; the current leaders cannot be chosen.",
            trigger: Trigger::Active,
            effect: Effect::ForceRevote {
                disallow_previous_candidate: true,
            },
            requires: &[Requirement::PhaseVoting, Requirement::VotingStarted],
            choice_kind: ChoiceKind::None,
            target_scope: None,
        },
        Blueprint {
            id: "replace_health",
            title: "Expired Pills",
            text: "Replace the chosen player's revealed health with a random one.",
            trigger: Trigger::Active,
            effect: Effect::ReplaceRevealedCard {
                category: CategoryKey::Health,
            },
            requires: &[Requirement::TargetHasRevealedHealth],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
        Blueprint {
            id: "force_category",
            title: "Direct Question",
            text: "Everyone must reveal a card of the chosen category this round.",
            trigger: Trigger::Active,
            effect: Effect::ForceRevealCategoryForAll,
            requires: &[Requirement::PhaseReveal],
            choice_kind: ChoiceKind::Category,
            target_scope: None,
        },
        Blueprint {
            id: "final_threat",
            title: "Hidden Threat",
            text: "If you are eliminated, raiders learn where the bunker is.",
            trigger: Trigger::OnOwnerEliminated,
            effect: Effect::AddFinalThreat {
                threat_key: Some("raiders_know_bunker".into()),
            },
            requires: &[Requirement::OwnerEliminated],
            choice_kind: ChoiceKind::None,
            target_scope: None,
        },
        Blueprint {
            id: "replace_profession",
            title: "Fake Diploma",
            text: "Replace the chosen player's revealed profession with a random one.",
            trigger: Trigger::Active,
            effect: Effect::ReplaceRevealedCard {
                category: CategoryKey::Profession,
            },
            requires: &[Requirement::TargetHasRevealedProfession],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
        Blueprint {
            id: "discard_health",
            title: "Good Pills",
            text: "The chosen player discards their revealed health and draws a hidden one.",
            trigger: Trigger::Active,
            effect: Effect::DiscardRevealedAndDealHidden {
                category: CategoryKey::Health,
            },
            requires: &[Requirement::TargetHasRevealedHealth],
            choice_kind: ChoiceKind::Player,
            target_scope: Some(TargetScope::AnyAlive),
        },
    ];

    blueprints.into_iter().map(SpecialDefinition::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_ids_are_unique() {
        let catalog = standard_catalog();
        let ids: HashSet<_> = catalog.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids.len(), catalog.len());
        assert!(catalog.iter().all(|d| d.implemented));
    }

    #[test]
    fn test_player_choices_have_a_scope() {
        for def in standard_catalog() {
            match def.choice_kind {
                ChoiceKind::Player | ChoiceKind::Neighbor => {
                    assert!(def.target_scope.is_some(), "{} needs a target scope", def.id)
                }
                ChoiceKind::None | ChoiceKind::Category => {
                    assert!(def.target_scope.is_none(), "{} has a stray scope", def.id)
                }
            }
        }
    }

    #[test]
    fn test_automatic_cards_need_no_choice() {
        for def in standard_catalog().iter().filter(|d| d.trigger.is_automatic()) {
            assert_eq!(def.choice_kind, ChoiceKind::None);
        }
    }

    #[test]
    fn test_effect_parses_from_catalog_json() {
        let def: SpecialDefinition = serde_json::from_str(
            r#"{
                "id": "plan_b",
                "title": "Plan B",
                "text": "",
                "trigger": "active",
                "effect": {"type": "forceRevote", "disallowPreviousCandidate": true},
                "implemented": true,
                "requires": ["phase=voting", "votingStarted"]
            }"#,
        )
        .unwrap();

        assert_eq!(
            def.effect,
            Effect::ForceRevote {
                disallow_previous_candidate: true
            }
        );
        assert_eq!(def.requires, vec![Requirement::PhaseVoting, Requirement::VotingStarted]);
        assert_eq!(def.choice_kind, ChoiceKind::None);
    }

    #[test]
    fn test_unknown_effect_is_unsupported() {
        let effect: Effect = serde_json::from_str(r#"{"type": "summonMeteor"}"#).unwrap();
        assert_eq!(effect, Effect::Unsupported);
        assert_eq!(effect.kind(), "unsupported");
    }

    #[test]
    fn test_secret_trigger_tag() {
        let trigger: Trigger = serde_json::from_str(r#""secret_onEliminate""#).unwrap();
        assert_eq!(trigger, Trigger::SecretOnEliminate);
        assert!(trigger.is_automatic());
    }
}
