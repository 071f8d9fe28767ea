//! Enumeration types carried by telemetry records.
//!
//! Wire names are `snake_case` and matched case-insensitively on decode.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The kind of occurrence a telemetry record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A level was entered.
    StartLevel,
    /// A level was completed or abandoned.
    EndLevel,
    /// An actor acquired a target.
    Targeted,
    /// An actor killed its target.
    Killed,
    /// An actor attacked its target.
    Attacked,
    /// An actor retaliated against an attacker.
    CounterAttacked,
    /// An actor was hit.
    Hit,
    /// Armor was picked up.
    PickupArmor,
    /// Health was picked up.
    PickupHealth,
    /// A weapon was picked up.
    PickupWeapon,
    /// A key card was picked up.
    PickupCard,
    /// An armor bonus was picked up.
    ArmorBonus,
    /// A health bonus was picked up.
    HealthBonus,
    /// An actor entered a sector.
    EnterSector,
    /// An actor entered a subsector.
    EnterSubsector,
    /// An actor moved.
    Move,
}

impl EventType {
    /// Every known event type, in declaration order.
    pub const ALL: [Self; 16] = [
        Self::StartLevel,
        Self::EndLevel,
        Self::Targeted,
        Self::Killed,
        Self::Attacked,
        Self::CounterAttacked,
        Self::Hit,
        Self::PickupArmor,
        Self::PickupHealth,
        Self::PickupWeapon,
        Self::PickupCard,
        Self::ArmorBonus,
        Self::HealthBonus,
        Self::EnterSector,
        Self::EnterSubsector,
        Self::Move,
    ];

    /// The wire and storage name of this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartLevel => "start_level",
            Self::EndLevel => "end_level",
            Self::Targeted => "targeted",
            Self::Killed => "killed",
            Self::Attacked => "attacked",
            Self::CounterAttacked => "counter_attacked",
            Self::Hit => "hit",
            Self::PickupArmor => "pickup_armor",
            Self::PickupHealth => "pickup_health",
            Self::PickupWeapon => "pickup_weapon",
            Self::PickupCard => "pickup_card",
            Self::ArmorBonus => "armor_bonus",
            Self::HealthBonus => "health_bonus",
            Self::EnterSector => "enter_sector",
            Self::EnterSubsector => "enter_subsector",
            Self::Move => "move",
        }
    }

    /// Look up an event type by name, ignoring ASCII case.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Actor kinds
// ---------------------------------------------------------------------------

/// What kind of simulation entity an actor is.
///
/// Everything other than [`ActorKind::Player`] is classified as an enemy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A human-controlled player.
    Player,
    /// Zombieman.
    Soldier,
    /// Shotgun guy.
    ShotgunSoldier,
    /// Pinky demon.
    Demon,
    /// Invisible demon.
    Spectre,
    /// Imp.
    Imp,
    /// Imp projectile.
    ImpFireball,
    /// Revenant.
    Undead,
    /// Lost soul.
    LostSoul,
    /// Cacodemon.
    Cacodemon,
    /// Cacodemon projectile.
    CacodemonFireball,
    /// Baron of Hell.
    BaronOfHell,
    /// Baron projectile.
    BaronFireball,
    /// Exploding barrel.
    Barrel,
    /// Rocket projectile.
    Rocket,
    /// Plasma projectile.
    Plasma,
    /// Any kind the decoder does not recognize.
    UnknownEnemy,
}

impl ActorKind {
    /// Every known actor kind, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::Player,
        Self::Soldier,
        Self::ShotgunSoldier,
        Self::Demon,
        Self::Spectre,
        Self::Imp,
        Self::ImpFireball,
        Self::Undead,
        Self::LostSoul,
        Self::Cacodemon,
        Self::CacodemonFireball,
        Self::BaronOfHell,
        Self::BaronFireball,
        Self::Barrel,
        Self::Rocket,
        Self::Plasma,
        Self::UnknownEnemy,
    ];

    /// The wire and storage name of this actor kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Soldier => "soldier",
            Self::ShotgunSoldier => "shotgun_soldier",
            Self::Demon => "demon",
            Self::Spectre => "spectre",
            Self::Imp => "imp",
            Self::ImpFireball => "imp_fireball",
            Self::Undead => "undead",
            Self::LostSoul => "lost_soul",
            Self::Cacodemon => "cacodemon",
            Self::CacodemonFireball => "cacodemon_fireball",
            Self::BaronOfHell => "baron_of_hell",
            Self::BaronFireball => "baron_fireball",
            Self::Barrel => "barrel",
            Self::Rocket => "rocket",
            Self::Plasma => "plasma",
            Self::UnknownEnemy => "unknown_enemy",
        }
    }

    /// Look up an actor kind by name, ignoring ASCII case. Unknown names
    /// map to [`ActorKind::UnknownEnemy`].
    pub fn parse_lenient(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(Self::UnknownEnemy)
    }

    /// Whether this actor is a player.
    pub const fn is_player(self) -> bool {
        matches!(self, Self::Player)
    }
}

impl core::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// The slot an actor fills in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The acting actor.
    Actor,
    /// The targeted actor.
    Target,
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Actor => f.write_str("actor"),
            Self::Target => f.write_str("target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parse_is_case_insensitive() {
        assert_eq!(EventType::parse("TARGETED"), Some(EventType::Targeted));
        assert_eq!(EventType::parse("Counter_Attacked"), Some(EventType::CounterAttacked));
        assert_eq!(EventType::parse("teleported"), None);
    }

    #[test]
    fn event_type_names_roundtrip() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn actor_kind_unknown_falls_back() {
        assert_eq!(ActorKind::parse_lenient("Barrel"), ActorKind::Barrel);
        assert_eq!(ActorKind::parse_lenient("cyberdemon"), ActorKind::UnknownEnemy);
        assert!(ActorKind::Player.is_player());
        assert!(!ActorKind::Imp.is_player());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::PickupCard).unwrap_or_default();
        assert_eq!(json, "\"pickup_card\"");
        let kind: ActorKind = serde_json::from_str("\"lost_soul\"").unwrap_or(ActorKind::Player);
        assert_eq!(kind, ActorKind::LostSoul);
    }
}
