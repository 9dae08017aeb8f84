use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{OutteError, OutteResult};

/// Number of score slots on every board.
pub const BOARD_SIZE: u32 = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BoardType {
    Level = 1,
    Episode = 2,
    Story = 3,
}

impl BoardType {
    pub const ALL: [BoardType; 3] = [BoardType::Level, BoardType::Episode, BoardType::Story];
    pub const DEFAULT: [BoardType; 2] = [BoardType::Level, BoardType::Episode];

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(BoardType::Level),
            2 => Some(BoardType::Episode),
            3 => Some(BoardType::Story),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> OutteResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "level" | "levels" => Ok(BoardType::Level),
            "episode" | "episodes" => Ok(BoardType::Episode),
            "story" | "stories" | "column" | "columns" => Ok(BoardType::Story),
            other => Err(OutteError::configuration(format!(
                "unrecognized board type '{other}'"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BoardType::Level => "Level",
            BoardType::Episode => "Episode",
            BoardType::Story => "Story",
        }
    }

    /// Query parameter name used by the upstream score endpoint.
    pub fn query_key(self) -> &'static str {
        match self {
            BoardType::Level => "level_id",
            BoardType::Episode => "episode_id",
            BoardType::Story => "story_id",
        }
    }

    /// Query type sent along with replay requests.
    pub fn replay_qt(self) -> u8 {
        match self {
            BoardType::Level => 0,
            BoardType::Episode => 1,
            BoardType::Story => 4,
        }
    }

    /// Number of sublevels recorded in one run of this board type.
    pub fn sublevel_count(self) -> usize {
        match self {
            BoardType::Level => 1,
            BoardType::Episode => 5,
            BoardType::Story => 25,
        }
    }

    pub fn tabs(self) -> &'static [Tab] {
        match self {
            BoardType::Level => &[Tab::SI, Tab::S, Tab::SL, Tab::SS, Tab::SU, Tab::SS2],
            BoardType::Episode | BoardType::Story => &[Tab::SI, Tab::S, Tab::SL, Tab::SU],
        }
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tab {
    SI = 0,
    S = 1,
    SL = 2,
    SS = 3,
    SU = 4,
    SS2 = 5,
}

impl Tab {
    pub const ALL: [Tab; 6] = [Tab::SI, Tab::S, Tab::SL, Tab::SS, Tab::SU, Tab::SS2];

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Tab::SI),
            1 => Some(Tab::S),
            2 => Some(Tab::SL),
            3 => Some(Tab::SS),
            4 => Some(Tab::SU),
            5 => Some(Tab::SS2),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> OutteResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SI" | "INTRO" => Ok(Tab::SI),
            "S" | "SOLO" => Ok(Tab::S),
            "SL" | "LEGACY" => Ok(Tab::SL),
            "SS" | "?" | "SECRET" => Ok(Tab::SS),
            "SU" | "ULTIMATE" => Ok(Tab::SU),
            "SS2" | "!" => Ok(Tab::SS2),
            other => Err(OutteError::configuration(format!("unrecognized tab '{other}'"))),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Tab::SI => "SI",
            Tab::S => "S",
            Tab::SL => "SL",
            Tab::SS => "SS",
            Tab::SU => "SU",
            Tab::SS2 => "SS2",
        }
    }

    /// Board id range the upstream server reserves for this tab.
    pub fn id_range(self, board_type: BoardType) -> Option<RangeInclusive<i64>> {
        match (board_type, self) {
            (BoardType::Level, Tab::SI) => Some(0..=124),
            (BoardType::Level, Tab::S) => Some(600..=1199),
            (BoardType::Level, Tab::SL) => Some(1200..=1799),
            (BoardType::Level, Tab::SS) => Some(1800..=1919),
            (BoardType::Level, Tab::SU) => Some(2400..=2999),
            (BoardType::Level, Tab::SS2) => Some(3000..=3119),
            (BoardType::Episode, Tab::SI) => Some(0..=24),
            (BoardType::Episode, Tab::S) => Some(120..=239),
            (BoardType::Episode, Tab::SL) => Some(240..=359),
            (BoardType::Episode, Tab::SU) => Some(480..=599),
            (BoardType::Story, Tab::SI) => Some(0..=4),
            (BoardType::Story, Tab::S) => Some(24..=43),
            (BoardType::Story, Tab::SL) => Some(48..=67),
            (BoardType::Story, Tab::SU) => Some(96..=115),
            _ => None,
        }
    }

    pub fn for_board(board_type: BoardType, board_id: i64) -> Option<Tab> {
        board_type
            .tabs()
            .iter()
            .copied()
            .find(|tab| tab.id_range(board_type).is_some_and(|r| r.contains(&board_id)))
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Composite key of a board: its variant plus its id within that variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct BoardRef {
    pub board_type: BoardType,
    pub board_id: i64,
}

impl BoardRef {
    pub fn new(board_type: BoardType, board_id: i64) -> Self {
        Self {
            board_type,
            board_id,
        }
    }
}

impl fmt::Display for BoardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.board_type, self.board_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub id: i64,
    pub tab: Tab,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Board {
    Level(BoardInfo),
    Episode(BoardInfo),
    Story(BoardInfo),
}

/// Capabilities shared by every scoreable board.
pub trait Highscoreable {
    fn board_type(&self) -> BoardType;
    fn info(&self) -> &BoardInfo;

    fn board_ref(&self) -> BoardRef {
        BoardRef::new(self.board_type(), self.info().id)
    }

    fn tab(&self) -> Tab {
        self.info().tab
    }

    fn name(&self) -> &str {
        &self.info().name
    }
}

impl Board {
    pub fn new(board_type: BoardType, info: BoardInfo) -> Self {
        match board_type {
            BoardType::Level => Board::Level(info),
            BoardType::Episode => Board::Episode(info),
            BoardType::Story => Board::Story(info),
        }
    }
}

impl Highscoreable for Board {
    fn board_type(&self) -> BoardType {
        match self {
            Board::Level(_) => BoardType::Level,
            Board::Episode(_) => BoardType::Episode,
            Board::Story(_) => BoardType::Story,
        }
    }

    fn info(&self) -> &BoardInfo {
        match self {
            Board::Level(info) | Board::Episode(info) | Board::Story(info) => info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_board_types_and_rejects_unknown() {
        assert_eq!(BoardType::parse("Level").unwrap(), BoardType::Level);
        assert_eq!(BoardType::parse(" episodes ").unwrap(), BoardType::Episode);
        assert_eq!(BoardType::parse("column").unwrap(), BoardType::Story);
        let err = BoardType::parse("userlevel").unwrap_err();
        assert!(matches!(err, OutteError::Configuration { .. }));
    }

    #[test]
    fn tab_lookup_follows_id_ranges() {
        assert_eq!(Tab::for_board(BoardType::Level, 0), Some(Tab::SI));
        assert_eq!(Tab::for_board(BoardType::Level, 1850), Some(Tab::SS));
        assert_eq!(Tab::for_board(BoardType::Level, 2000), None);
        assert_eq!(Tab::for_board(BoardType::Episode, 500), Some(Tab::SU));
        assert_eq!(Tab::for_board(BoardType::Story, 30), Some(Tab::S));
    }

    #[test]
    fn board_variant_exposes_shared_capabilities() {
        let board = Board::new(
            BoardType::Episode,
            BoardInfo {
                id: 120,
                tab: Tab::S,
                name: "S-A-00".to_string(),
            },
        );
        assert_eq!(board.board_ref(), BoardRef::new(BoardType::Episode, 120));
        assert_eq!(board.tab(), Tab::S);
        assert_eq!(board.name(), "S-A-00");
    }

    #[test]
    fn small_int_roundtrip() {
        for board_type in BoardType::ALL {
            assert_eq!(BoardType::from_i16(board_type.as_i16()), Some(board_type));
        }
        for tab in Tab::ALL {
            assert_eq!(Tab::from_i16(tab.as_i16()), Some(tab));
        }
    }
}
