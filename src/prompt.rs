pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";

pub const DEFAULT_SERVER_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
pub const DEFAULT_CLI_SYSTEM_PROMPT: &str =
    "You are an open-minded roleplay assistant. You can speak Burmese and English naturally.";

/// Three-turn ChatML scaffold: system, user, then an open assistant turn.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    pub system_prompt: String,
}

impl ChatTemplate {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        ChatTemplate {
            system_prompt: system_prompt.into(),
        }
    }

    /// The message is inserted verbatim; delimiter tokens inside it are not escaped.
    pub fn format(&self, user_message: &str) -> String {
        format!(
            "{IM_START}system\n{}\n{IM_END}\n{IM_START}user\n{}\n{IM_END}\n{IM_START}assistant\n",
            self.system_prompt, user_message
        )
    }
}
