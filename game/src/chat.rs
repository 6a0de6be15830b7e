//! Bounded chat display and its input field

use log::debug;
use std::collections::VecDeque;

/// Sink for formatted chat lines
pub trait ChatDisplay {
    fn append_display_message(&mut self, message: String);
}

#[derive(Debug, Clone)]
pub struct ChatPanel {
    messages: VecDeque<String>,
    max_messages: usize,
    input_field: String,
}

impl ChatPanel {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages),
            max_messages,
            input_field: String::new(),
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> + '_ {
        self.messages.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text shown in the panel, oldest line first
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input_field = text.into();
    }

    pub fn input(&self) -> &str {
        &self.input_field
    }

    /// Takes the trimmed input field for sending
    ///
    /// Blank input yields None and leaves the field as it was.
    pub fn take_outgoing(&mut self) -> Option<String> {
        let message = self.input_field.trim();
        if message.is_empty() {
            return None;
        }
        let message = message.to_string();
        self.input_field.clear();
        Some(message)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl ChatDisplay for ChatPanel {
    fn append_display_message(&mut self, message: String) {
        debug!("Chat: {}", message);
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }
}
