pub mod protocol;
pub mod vector;

pub use protocol::{
    ClientMessage, EnemySnapshot, PlayerReport, PlayerSnapshot, ProtocolError, ServerMessage,
    WorldSnapshot, MAX_DATAGRAM_LEN,
};
pub use vector::Vec2;

use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_PORT: u16 = 5006;
pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_TILE_SIZE: f32 = 16.0;
pub const PING_INTERVAL_MS: u64 = 1000;
pub const TEXT_FIELD_WIDTH: usize = 15;

/// Hitbox shared by players and enemies. Positions are the top-left corner.
pub const ENTITY_WIDTH: f32 = 8.0;
pub const ENTITY_HEIGHT: f32 = 15.0;

/// Fallback spawn point for levels without a player start marker.
pub const DEFAULT_SPAWN: Vec2 = Vec2::new(50.0, 50.0);

/// Player animation state. Reports carry the numeric code, snapshots carry the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    #[default]
    Idle,
    Run,
    Jump,
    WallSlide,
    Slide,
    AttackFront,
    AttackUp,
    AttackDown,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Idle,
        Action::Run,
        Action::Jump,
        Action::WallSlide,
        Action::Slide,
        Action::AttackFront,
        Action::AttackUp,
        Action::AttackDown,
    ];

    /// Unknown codes fall back to idle.
    pub fn from_code(code: u8) -> Self {
        Self::ALL.get(code as usize).copied().unwrap_or_default()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Idle => "idle",
            Action::Run => "run",
            Action::Jump => "jump",
            Action::WallSlide => "wall_slide",
            Action::Slide => "slide",
            Action::AttackFront => "attack_front",
            Action::AttackUp => "attack_up",
            Action::AttackDown => "attack_down",
        }
    }

    /// Unknown names fall back to idle.
    pub fn from_text(text: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == text)
            .unwrap_or_default()
    }
}

/// Observable enemy state carried in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnemyState {
    #[default]
    Idle,
    Chase,
    Rage,
}

impl EnemyState {
    pub fn as_str(self) -> &'static str {
        match self {
            EnemyState::Idle => "idle",
            EnemyState::Chase => "chase",
            EnemyState::Rage => "rage",
        }
    }

    pub fn from_text(text: &str) -> Self {
        match text {
            "chase" => EnemyState::Chase,
            "rage" => EnemyState::Rage,
            _ => EnemyState::Idle,
        }
    }
}

/// Milliseconds since the Unix epoch. Used for ping timestamps.
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes_match_wire_table() {
        assert_eq!(Action::Idle.code(), 0);
        assert_eq!(Action::WallSlide.code(), 3);
        assert_eq!(Action::AttackDown.code(), 7);
        for action in Action::ALL {
            assert_eq!(Action::from_code(action.code()), action);
            assert_eq!(Action::from_text(action.as_str()), action);
        }
    }

    #[test]
    fn test_unknown_action_falls_back_to_idle() {
        assert_eq!(Action::from_code(8), Action::Idle);
        assert_eq!(Action::from_code(255), Action::Idle);
        assert_eq!(Action::from_text("dance"), Action::Idle);
        assert_eq!(Action::from_text(""), Action::Idle);
    }

    #[test]
    fn test_enemy_state_names() {
        assert_eq!(EnemyState::Chase.as_str(), "chase");
        assert_eq!(EnemyState::from_text("rage"), EnemyState::Rage);
        assert_eq!(EnemyState::from_text("sleeping"), EnemyState::Idle);
    }

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let a = get_timestamp();
        let b = get_timestamp();
        assert!(a > 0);
        assert!(b >= a);
    }
}
