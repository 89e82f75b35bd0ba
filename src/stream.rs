//! Incremental decoding of the backend's `stream-json` output.
//!
//! The backend writes one JSON event per line, possibly interleaved with
//! non-JSON noise (warnings, progress text on stderr). [`StreamAccumulator`]
//! is fed each raw line as it arrives and keeps:
//!
//! - every text fragment from `assistant` messages, in order
//! - token usage, preferring the terminal `result` event over inline
//!   `assistant` usage
//! - the reported total cost, if any
//!
//! Lines that are not a recognizable event are skipped.

use serde::Deserialize;

/// Fixed fallback rates, USD per million tokens.
pub const INPUT_USD_PER_MTOK: f64 = 3.0;
pub const OUTPUT_USD_PER_MTOK: f64 = 15.0;

/// Cost estimate used when the backend reports no total.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 * INPUT_USD_PER_MTOK + output_tokens as f64 * OUTPUT_USD_PER_MTOK)
        / 1_000_000.0
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Assistant {
        #[serde(default)]
        message: Option<AssistantMessage>,
    },
    Result {
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: ContentField,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Content is normally an array of blocks but may be a bare string.
#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
enum ContentField {
    Blocks(Vec<ContentBlock>),
    Text(String),
    #[default]
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl Usage {
    /// Cache reads count toward input.
    fn input(&self) -> u64 {
        self.input_tokens + self.cache_read_input_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageSource {
    None,
    Inline,
    Final,
}

/// Running state for one backend invocation.
#[derive(Debug)]
pub struct StreamAccumulator {
    fragments: Vec<String>,
    input_tokens: u64,
    output_tokens: u64,
    reported_cost: Option<f64>,
    usage_source: UsageSource,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            reported_cost: None,
            usage_source: UsageSource::None,
        }
    }

    /// Feed one raw output line. Returns the text fragments it contributed so
    /// the caller can echo them live.
    pub fn ingest(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let event: StreamEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("skipping non-event line: {}", e);
                return Vec::new();
            }
        };

        match event {
            StreamEvent::Assistant { message } => {
                let Some(message) = message else {
                    return Vec::new();
                };
                let mut added = Vec::new();
                match message.content {
                    ContentField::Blocks(blocks) => {
                        for block in blocks {
                            if let ContentBlock::Text { text } = block {
                                push_fragment(&mut added, &text);
                            }
                        }
                    }
                    ContentField::Text(text) => push_fragment(&mut added, &text),
                    ContentField::Empty => {}
                }
                if let Some(usage) = message.usage {
                    // A final `result` event has the last word on usage.
                    if self.usage_source != UsageSource::Final {
                        self.input_tokens = usage.input();
                        self.output_tokens = usage.output_tokens;
                        self.usage_source = UsageSource::Inline;
                    }
                }
                self.fragments.extend(added.iter().cloned());
                added
            }
            StreamEvent::Result {
                usage,
                total_cost_usd,
            } => {
                if let Some(usage) = usage {
                    self.input_tokens = usage.input();
                    self.output_tokens = usage.output_tokens;
                    self.usage_source = UsageSource::Final;
                }
                if let Some(cost) = total_cost_usd {
                    self.reported_cost = Some(cost);
                }
                Vec::new()
            }
            StreamEvent::Unknown => Vec::new(),
        }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Reported total cost when non-zero, otherwise the fixed-rate estimate.
    pub fn cost_usd(&self) -> f64 {
        match self.reported_cost {
            Some(cost) if cost != 0.0 => cost,
            _ => estimate_cost(self.input_tokens, self.output_tokens),
        }
    }

    pub fn into_fragments(self) -> Vec<String> {
        self.fragments
    }
}

fn push_fragment(out: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
}
