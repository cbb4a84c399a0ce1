use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Turn {
    user: String,
    assistant: String,
}

/// In-process conversation memory for one session.
///
/// Keeps at most `max_turns` question/answer pairs (0 keeps everything).
/// Nothing is persisted.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, user: &str, assistant: &str) {
        self.turns.push_back(Turn {
            user: user.to_string(),
            assistant: assistant.to_string(),
        });
        if self.max_turns > 0 {
            while self.turns.len() > self.max_turns {
                self.turns.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Renders the remembered turns as `User:` / `Assistant:` lines, oldest first.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.user, t.assistant))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
