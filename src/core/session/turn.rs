//! Turn-taking state machine.
//!
//! [`TurnTracker`] folds inbound `contentStart`, `textOutput` and
//! `contentEnd` events into a transcript and a pair of indicators
//! (user speaking, assistant thinking). It performs no I/O; every call
//! returns the [`TurnEffect`]s the session should dispatch.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::messages::{
    ContentEndOutput, ContentRole, ContentStartOutput, ContentType, GenerationStage, StopReason,
    TextOutput,
};

/// Fragments per role checked for duplicates.
const DEDUP_WINDOW: usize = 3;

/// Fragments remembered across all roles.
const RECENT_CAPACITY: usize = 16;

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ContentRole,
    pub text: String,
    /// UUID v4
    pub id: String,
    /// Set once the turn containing this entry ended
    pub end_of_response: bool,
    /// Stage of the content block the latest fragment came from
    pub generation_stage: Option<GenerationStage>,
}

impl ChatMessage {
    fn new(role: ContentRole, text: &str, generation_stage: Option<GenerationStage>) -> Self {
        Self {
            role,
            text: text.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            end_of_response: false,
            generation_stage,
        }
    }
}

/// Turn indicators shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnIndicators {
    pub user_speaking: bool,
    pub assistant_thinking: bool,
    /// Role of the most recently opened content block
    pub role: Option<ContentRole>,
}

/// Side effect produced by an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEffect {
    /// A transcript entry was added or changed
    Transcript(ChatMessage),
    /// Indicators changed
    Indicators(TurnIndicators),
    /// Playback must be flushed
    BargeIn,
}

#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    role: ContentRole,
    generation_stage: Option<GenerationStage>,
}

/// Transcript and indicator bookkeeping for one session.
#[derive(Debug, Default)]
pub struct TurnTracker {
    messages: Vec<ChatMessage>,
    indicators: TurnIndicators,
    blocks: HashMap<String, BlockInfo>,
    last_block: Option<BlockInfo>,
    recent: VecDeque<(ContentRole, String)>,
    capture_active: bool,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether local audio capture is currently streaming.
    pub fn set_capture_active(&mut self, active: bool) {
        self.capture_active = active;
    }

    pub fn capture_active(&self) -> bool {
        self.capture_active
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn indicators(&self) -> TurnIndicators {
        self.indicators
    }

    pub fn on_content_start(&mut self, event: &ContentStartOutput) -> Vec<TurnEffect> {
        let block = BlockInfo {
            role: event.role,
            generation_stage: event.generation_stage(),
        };
        if let Some(id) = &event.content_id {
            self.blocks.insert(id.clone(), block);
        }
        self.last_block = Some(block);

        let before = self.indicators;
        match event.role {
            ContentRole::User => {
                self.indicators.role = Some(ContentRole::User);
                if event.content_type == ContentType::Audio && self.capture_active {
                    self.indicators.user_speaking = true;
                }
            }
            ContentRole::Assistant => {
                self.indicators.role = Some(ContentRole::Assistant);
                self.indicators.user_speaking = false;
            }
            _ => {}
        }
        self.indicator_effect(before).into_iter().collect()
    }

    pub fn on_text_output(&mut self, event: &TextOutput) -> Vec<TurnEffect> {
        if event.is_interruption() {
            tracing::debug!("Interruption marker received");
            return vec![TurnEffect::BargeIn];
        }

        let text = event.content.trim();
        if text.is_empty() || self.is_duplicate(event.role, text) {
            return Vec::new();
        }
        self.remember(event.role, text);

        let stage = event
            .content_id
            .as_ref()
            .and_then(|id| self.blocks.get(id))
            .or(self.last_block.as_ref())
            .and_then(|block| block.generation_stage);

        match self.messages.last_mut() {
            Some(last) if last.role == event.role && !last.end_of_response => {
                last.text.push(' ');
                last.text.push_str(text);
                if stage.is_some() {
                    last.generation_stage = stage;
                }
                vec![TurnEffect::Transcript(last.clone())]
            }
            _ => {
                let message = ChatMessage::new(event.role, text, stage);
                self.messages.push(message.clone());
                vec![TurnEffect::Transcript(message)]
            }
        }
    }

    pub fn on_content_end(&mut self, event: &ContentEndOutput) -> Vec<TurnEffect> {
        let registered = event.content_id.as_ref().and_then(|id| self.blocks.remove(id));
        let role = event
            .role
            .or(registered.map(|block| block.role))
            .or(self.last_block.map(|block| block.role));

        let before = self.indicators;
        match event.content_type {
            ContentType::Text => match role {
                Some(ContentRole::User) => self.indicators.assistant_thinking = true,
                Some(ContentRole::Assistant) => self.indicators.assistant_thinking = false,
                _ => {}
            },
            ContentType::Audio => self.indicators.user_speaking = false,
            _ => {}
        }

        let mut effects: Vec<TurnEffect> = self.indicator_effect(before).into_iter().collect();
        match event.stop_reason {
            Some(StopReason::EndTurn) => {
                for message in self.messages.iter_mut().filter(|m| !m.end_of_response) {
                    message.end_of_response = true;
                    effects.push(TurnEffect::Transcript(message.clone()));
                }
                // Duplicates only repeat within a turn; blocks never reopen across one
                self.recent.clear();
                self.blocks.clear();
            }
            Some(StopReason::Interrupted) => effects.push(TurnEffect::BargeIn),
            _ => {}
        }
        effects
    }

    fn indicator_effect(&self, before: TurnIndicators) -> Option<TurnEffect> {
        (self.indicators != before).then_some(TurnEffect::Indicators(self.indicators))
    }

    fn is_duplicate(&self, role: ContentRole, text: &str) -> bool {
        self.recent
            .iter()
            .rev()
            .filter(|(r, _)| *r == role)
            .take(DEDUP_WINDOW)
            .any(|(_, previous)| previous == text)
    }

    fn remember(&mut self, role: ContentRole, text: &str) {
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back((role, text.to_string()));
    }
}
