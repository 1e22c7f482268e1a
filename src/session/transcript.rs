use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One agent turn as displayed: the latest whole-so-far text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// Current content (each fragment replaces it)
    pub content: String,

    /// When the first fragment arrived
    pub started_at: DateTime<Utc>,

    /// Set when a final fragment or a turn completion closes the turn
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranscriptTurn {
    pub fn is_final(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Agent transcript for the lifetime of one controller.
///
/// The server streams whole-so-far transcripts, not deltas, so a fragment
/// replaces the open turn's content. A fragment with `partial = false`
/// finalizes the turn; the next fragment opens a new one.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<TranscriptTurn>,
    open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    /// The turn still accepting fragments, if any.
    pub fn current(&self) -> Option<&TranscriptTurn> {
        if self.open {
            self.turns.last()
        } else {
            None
        }
    }

    /// Apply one text fragment and return the turn it landed in.
    pub fn apply_fragment(&mut self, text: &str, partial: bool) -> &TranscriptTurn {
        let now = Utc::now();
        let completed_at = if partial { None } else { Some(now) };

        let open_turn = if self.open { self.turns.last_mut() } else { None };
        if let Some(turn) = open_turn {
            turn.content = text.to_string();
            turn.completed_at = completed_at;
        } else {
            self.turns.push(TranscriptTurn {
                content: text.to_string(),
                started_at: now,
                completed_at,
            });
        }
        self.open = partial;

        &self.turns[self.turns.len() - 1]
    }

    /// Close the open turn with a completion timestamp.
    pub fn finalize_current(&mut self) -> Option<&TranscriptTurn> {
        if !self.open {
            return None;
        }
        self.open = false;
        let turn = self.turns.last_mut()?;
        turn.completed_at = Some(Utc::now());
        Some(turn)
    }

    /// Stop accepting fragments into the open turn without finalizing it.
    ///
    /// Used on interruption and reconnect: the next fragment starts fresh.
    pub fn break_turn(&mut self) {
        self.open = false;
    }
}
