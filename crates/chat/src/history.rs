use std::time::Duration;

use rand::Rng;

use glimmer_store::{MessageId, MessageRecord, Sender, current_unix_timestamp_ms};

/// Older history is capped; past this many pages the conversation simply
/// has no more backlog to reveal.
pub const MAX_HISTORY_PAGES: u32 = 5;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_LOAD_DELAY: Duration = Duration::from_millis(800);

/// Each page reaches two hours further into the past.
const PAGE_AGE_STEP_MS: u64 = 2 * 60 * 60 * 1000;
/// Messages within a page sit five minutes apart.
const MESSAGE_SPACING_MS: u64 = 5 * 60 * 1000;

const USER_PROMPTS: &[&str] = &[
    "What's the weather like today?",
    "Can you help me with a coding problem?",
    "I'm working on a new project and need some advice.",
    "How do you implement authentication in a web app?",
    "What are the best practices for state management?",
    "Can you explain how async/await works?",
    "I'm having trouble with CSS grid layout.",
    "How do I optimize my application's performance?",
    "Can you recommend some good development tools?",
    "I need help with database design.",
    "What are the latest trends in web development?",
    "How do I handle errors gracefully?",
    "Can you explain REST APIs?",
    "What's the best way to test components?",
    "I'm learning a new language, any tips?",
    "How do I deploy my app to production?",
    "What's the difference between SQL and NoSQL?",
    "Can you help me understand algorithms?",
    "What are design patterns in programming?",
];

const AI_REPLIES: &[&str] = &[
    "I'd be happy to help you with that! Let me break it down for you.",
    "That's a great question! Here's what I think about it.",
    "I understand your concern. Let me provide some guidance.",
    "Great point! I can definitely help you with that.",
    "That's an interesting challenge. Here's my approach to solving it.",
    "I see what you're getting at. Let me explain this concept.",
    "Excellent question! This is a common issue that many developers face.",
    "I appreciate you asking! Here's a comprehensive answer.",
    "That's a thoughtful inquiry. Let me walk you through this.",
    "I'm glad you brought this up! Here's what you need to know.",
];

/// Produces synthetic older-history pages after a simulated load delay.
/// Page 1 is the most recent backlog page; higher pages are older.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    load_delay: Duration,
    page_size: usize,
    /// Timestamps are derived backwards from this instant.
    reference_time_unix_ms: u64,
}

impl Default for HistoryLoader {
    fn default() -> Self {
        Self {
            load_delay: DEFAULT_LOAD_DELAY,
            page_size: DEFAULT_PAGE_SIZE,
            reference_time_unix_ms: current_unix_timestamp_ms(),
        }
    }
}

impl HistoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, load_delay: Duration) -> Self {
        self.load_delay = load_delay;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_reference_time(mut self, reference_time_unix_ms: u64) -> Self {
        self.reference_time_unix_ms = reference_time_unix_ms;
        self
    }

    /// Fetches one page of older messages, oldest first, after the
    /// simulated network delay.
    pub async fn load_page(&self, page: u32) -> Vec<MessageRecord> {
        tokio::time::sleep(self.load_delay).await;
        self.generate_page(page)
    }

    fn generate_page(&self, page: u32) -> Vec<MessageRecord> {
        let mut rng = rand::thread_rng();
        let base_time = self
            .reference_time_unix_ms
            .saturating_sub(u64::from(page) * PAGE_AGE_STEP_MS);

        let mut messages: Vec<MessageRecord> = (0..self.page_size)
            .map(|index| {
                let timestamp_unix_ms =
                    base_time.saturating_sub(index as u64 * MESSAGE_SPACING_MS);
                let is_user = rng.gen_bool(0.4);
                let (sender, pool) = if is_user {
                    (Sender::User, USER_PROMPTS)
                } else {
                    (Sender::Ai, AI_REPLIES)
                };
                let text = pool[rng.gen_range(0..pool.len())];

                MessageRecord {
                    id: MessageId::new_random(),
                    text: text.to_string(),
                    sender,
                    timestamp_unix_ms,
                    images: Vec::new(),
                    is_streaming: false,
                }
            })
            .collect();

        // Generation walks backwards in time; history reads oldest first.
        messages.sort_by_key(|message| message.timestamp_unix_ms);
        messages
    }
}

/// Tracks how far back a chatroom has paged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    next_page: u32,
}

impl Default for Paginator {
    fn default() -> Self {
        Self { next_page: 1 }
    }
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_more(&self) -> bool {
        self.next_page <= MAX_HISTORY_PAGES
    }

    /// Claims the next page number, or `None` when the backlog is
    /// exhausted.
    pub fn claim_next(&mut self) -> Option<u32> {
        if !self.has_more() {
            return None;
        }
        let page = self.next_page;
        self.next_page += 1;
        Some(page)
    }

    pub fn pages_loaded(&self) -> u32 {
        self.next_page - 1
    }
}
